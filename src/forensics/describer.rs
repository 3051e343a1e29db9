use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::AnalysisError;
use crate::config::ForensicsConfig;
use crate::error::{ForensicError, Result};
use crate::llm::{LanguageModel, MistralClient};
use crate::message::{Attachment, Message};

#[async_trait]
pub trait ImageDescriber: Send + Sync {
    async fn describe(&self, image: &[u8]) -> std::result::Result<String, AnalysisError>;
}

/// Describes images by sending them inline to a multimodal chat model.
pub struct ChatImageDescriber {
    model: Arc<dyn LanguageModel>,
    prompt: String,
}

impl ChatImageDescriber {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            prompt: ForensicsConfig::default().description_prompt,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn from_config(cfg: &ForensicsConfig) -> Result<Self> {
        let api_key = cfg.mistral_api_key.clone().ok_or_else(|| {
            ForensicError::Config("MISTRAL_API_KEY is required for image description".into())
        })?;
        let client = MistralClient::new(api_key)
            .with_model(&cfg.description_model)
            .with_base_url(&cfg.mistral_base_url)
            .with_timeout(Duration::from_secs(cfg.service_timeout_secs));
        Ok(Self::new(Arc::new(client)).with_prompt(&cfg.description_prompt))
    }
}

/// Best-effort MIME type for a data URL; unknown formats are labelled JPEG.
fn sniff_mime(image: &[u8]) -> &'static str {
    image::guess_format(image)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/jpeg")
}

#[async_trait]
impl ImageDescriber for ChatImageDescriber {
    async fn describe(&self, image: &[u8]) -> std::result::Result<String, AnalysisError> {
        let request = Message::user(self.prompt.as_str())
            .with_attachment(Attachment::inline_image(sniff_mime(image), image));

        let completion = self
            .model
            .complete_chat(std::slice::from_ref(&request), &[])
            .await
            .map_err(|err| AnalysisError::DescriptionService(err.to_string()))?;

        completion
            .content
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AnalysisError::DescriptionService("empty description".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;
    use crate::message::AttachmentKind;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[tokio::test]
    async fn sends_prompt_and_inline_image() {
        let model = StubModel::new(vec!["A scene of wild flowers".into()]);
        let describer = ChatImageDescriber::new(model.clone());

        let description = describer.describe(PNG_MAGIC).await.unwrap();
        assert_eq!(description, "A scene of wild flowers");

        let request = &model.requests()[0][0];
        assert_eq!(request.content, "What's in this image?");
        assert_eq!(request.attachments[0].kind, AttachmentKind::Image);
        assert!(request.attachments[0].uri.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn blank_descriptions_are_service_errors() {
        let model = StubModel::new(vec!["   ".into()]);
        let describer = ChatImageDescriber::new(model);
        let err = describer.describe(b"raw").await.unwrap_err();
        assert!(matches!(err, AnalysisError::DescriptionService(_)));
    }

    #[tokio::test]
    async fn model_failures_are_service_errors() {
        let model = StubModel::new(Vec::new());
        let describer = ChatImageDescriber::new(model);
        let err = describer.describe(b"raw").await.unwrap_err();
        assert!(matches!(err, AnalysisError::DescriptionService(_)));
    }

    #[test]
    fn from_config_requires_a_key() {
        let cfg = ForensicsConfig::default();
        assert!(matches!(
            ChatImageDescriber::from_config(&cfg),
            Err(ForensicError::Config(_))
        ));
    }

    #[test]
    fn unknown_bytes_default_to_jpeg() {
        assert_eq!(sniff_mime(b"????"), "image/jpeg");
    }
}
