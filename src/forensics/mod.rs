//! Image forensics: describe an image and judge how likely it is to be a deepfake.
//!
//! A call to [`ImageForensicsTool::analyse`] fetches the image once and then runs
//! two independent branches concurrently:
//!
//! - the raw bytes go to an [`ImageDescriber`] (a multimodal chat model);
//! - the bytes are center-cropped, resized and re-encoded by [`normalize`], the
//!   result goes to an [`ImageClassifier`], and the `"Deepfake"` confidence is
//!   bucketed into a [`Judgement`].
//!
//! Either branch failing fails the whole call; there are no partial results and
//! no retries at this level.

mod classifier;
mod describer;
mod preprocess;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ForensicsConfig;

pub use classifier::{
    ClassificationResult, HuggingFaceClassifier, ImageClassifier, LabelScore, LazyClassifier,
    DEEPFAKE_LABEL,
};
pub use describer::{ChatImageDescriber, ImageDescriber};
pub use preprocess::{
    center_crop, center_crop_window, normalize, square_resize, CropWindow, NormalizedImage,
    JPEG_QUALITY, TARGET_SIZE,
};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to fetch image from `{url}`: {reason}")]
    Fetch { url: String, reason: String },

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to encode normalized image: {0}")]
    Encode(String),

    #[error("description service error: {0}")]
    DescriptionService(String),

    #[error("classification service error: {0}")]
    ClassificationService(String),

    #[error("classifier output has no `{label}` label (available: {available:?})")]
    LabelNotFound {
        label: String,
        available: Vec<String>,
    },
}

/// Categorical deepfake likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Judgement {
    Unlikely,
    Unknown,
    Likely,
}

impl Judgement {
    pub const UNKNOWN_THRESHOLD: f64 = 0.5;
    pub const LIKELY_THRESHOLD: f64 = 0.9;

    /// Lower bounds are inclusive: 0.5 is `Unknown`, 0.9 is `Likely`.
    /// Scores that are not finite or fall outside `[0, 1]` have no judgement.
    pub fn from_score(score: f64) -> Option<Self> {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return None;
        }
        Some(if score < Self::UNKNOWN_THRESHOLD {
            Judgement::Unlikely
        } else if score < Self::LIKELY_THRESHOLD {
            Judgement::Unknown
        } else {
            Judgement::Likely
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Judgement::Unlikely => "unlikely",
            Judgement::Unknown => "unknown",
            Judgement::Likely => "likely",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub description: String,
    #[serde(rename = "deepfake-score")]
    pub deepfake_judgement: Judgement,
}

pub struct ImageForensicsTool {
    http: reqwest::Client,
    describer: Arc<dyn ImageDescriber>,
    classifier: Arc<dyn ImageClassifier>,
    max_image_bytes: usize,
}

impl ImageForensicsTool {
    pub fn new(
        http: reqwest::Client,
        describer: Arc<dyn ImageDescriber>,
        classifier: Arc<dyn ImageClassifier>,
    ) -> Self {
        Self {
            http,
            describer,
            classifier,
            max_image_bytes: ForensicsConfig::default().max_image_bytes,
        }
    }

    /// Wire the Mistral describer and the lazily initialized Hugging Face classifier.
    pub fn from_config(cfg: &ForensicsConfig) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.fetch_timeout_secs))
            .build()
            .map_err(|err| crate::ForensicError::Config(format!("http client error: {err}")))?;
        let describer = ChatImageDescriber::from_config(cfg)?;
        let classifier = LazyClassifier::huggingface(cfg.clone());
        Ok(Self::new(http, Arc::new(describer), Arc::new(classifier))
            .with_max_image_bytes(cfg.max_image_bytes))
    }

    pub fn with_max_image_bytes(mut self, max: usize) -> Self {
        self.max_image_bytes = max;
        self
    }

    pub async fn analyse(&self, url: &str) -> Result<AnalysisResult, AnalysisError> {
        let raw: Arc<[u8]> = self.fetch(url).await?.into();
        tracing::debug!(url, bytes = raw.len(), "fetched image");

        let description = self.describer.describe(&raw);
        let judgement = self.judge(Arc::clone(&raw));
        let (description, deepfake_judgement) = tokio::try_join!(description, judgement)?;

        tracing::info!(url, judgement = deepfake_judgement.as_str(), "image analysed");
        Ok(AnalysisResult {
            description,
            deepfake_judgement,
        })
    }

    async fn judge(&self, raw: Arc<[u8]>) -> Result<Judgement, AnalysisError> {
        let normalized = tokio::task::spawn_blocking(move || normalize(&raw, TARGET_SIZE))
            .await
            .map_err(|err| AnalysisError::Decode(format!("normalization task failed: {err}")))??;

        let classification = self.classifier.classify(&normalized).await?;
        let score = classification.score_for(DEEPFAKE_LABEL)?;
        tracing::debug!(score, "deepfake confidence");
        Judgement::from_score(score).ok_or_else(|| {
            AnalysisError::ClassificationService(format!("score {score} is outside [0, 1]"))
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AnalysisError> {
        let fetch_error = |reason: String| AnalysisError::Fetch {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| fetch_error(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("server responded with {status}")));
        }
        if let Some(len) = response.content_length() {
            if len as usize > self.max_image_bytes {
                return Err(fetch_error(format!(
                    "image is {len} bytes, limit is {}",
                    self.max_image_bytes
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| fetch_error(err.to_string()))?
        {
            if body.len() + chunk.len() > self.max_image_bytes {
                return Err(fetch_error(format!(
                    "image exceeds the {} byte limit",
                    self.max_image_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}
