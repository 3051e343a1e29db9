use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

use super::AnalysisError;

/// Side length of the square image handed to the classifier.
pub const TARGET_SIZE: u32 = 224;
pub const JPEG_QUALITY: u8 = 75;

/// Square region kept by the center crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub side: u32,
}

/// The leading margin along the longer axis is `floor(diff / 2)` and the kept side
/// equals the shorter dimension, so an odd difference leaves the extra pixel on the
/// trailing edge.
pub fn center_crop_window(width: u32, height: u32) -> CropWindow {
    let side = width.min(height);
    CropWindow {
        x: (width - side) / 2,
        y: (height - side) / 2,
        side,
    }
}

pub fn center_crop(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == height {
        return image.clone();
    }
    let window = center_crop_window(width, height);
    imageops::crop_imm(image, window.x, window.y, window.side, window.side).to_image()
}

/// Center-crop to a square, then Lanczos-resample to `size × size`.
pub fn square_resize(image: &RgbImage, size: u32) -> RgbImage {
    let square = center_crop(image);
    if square.width() == size {
        return square;
    }
    imageops::resize(&square, size, size, FilterType::Lanczos3)
}

/// Classifier input: a square RGB JPEG.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    jpeg: Vec<u8>,
    size: u32,
}

impl NormalizedImage {
    pub const MIME_TYPE: &'static str = "image/jpeg";

    pub fn as_bytes(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    #[cfg(test)]
    pub(crate) fn for_tests(jpeg: Vec<u8>) -> Self {
        Self {
            jpeg,
            size: TARGET_SIZE,
        }
    }
}

/// Decode, convert to RGB, center-crop, resize and re-encode as JPEG.
pub fn normalize(raw: &[u8], size: u32) -> Result<NormalizedImage, AnalysisError> {
    let decoded =
        image::load_from_memory(raw).map_err(|err| AnalysisError::Decode(err.to_string()))?;
    let rgb = decoded.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(AnalysisError::Decode("image has no pixels".into()));
    }

    let square = square_resize(&rgb, size);
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&square)
        .map_err(|err| AnalysisError::Encode(err.to_string()))?;

    Ok(NormalizedImage { jpeg, size })
}
