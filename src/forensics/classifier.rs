use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use super::preprocess::NormalizedImage;
use super::AnalysisError;
use crate::config::{ClassifierDevice, ForensicsConfig};

/// Label whose confidence drives the judgement.
pub const DEEPFAKE_LABEL: &str = "Deepfake";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassificationResult {
    scores: Vec<LabelScore>,
}

impl ClassificationResult {
    pub fn new(scores: Vec<LabelScore>) -> Self {
        Self { scores }
    }

    pub fn scores(&self) -> &[LabelScore] {
        &self.scores
    }

    /// Confidence for `label`. A missing label is a model/configuration mismatch
    /// and is never defaulted.
    pub fn score_for(&self, label: &str) -> Result<f64, AnalysisError> {
        let entry = self
            .scores
            .iter()
            .find(|entry| entry.label == label)
            .ok_or_else(|| AnalysisError::LabelNotFound {
                label: label.to_string(),
                available: self.scores.iter().map(|s| s.label.clone()).collect(),
            })?;

        if !entry.score.is_finite() || !(0.0..=1.0).contains(&entry.score) {
            return Err(AnalysisError::ClassificationService(format!(
                "score {} for `{label}` is outside [0, 1]",
                entry.score
            )));
        }
        Ok(entry.score)
    }
}

#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(
        &self,
        image: &NormalizedImage,
    ) -> Result<ClassificationResult, AnalysisError>;
}

/// Image classification through the Hugging Face inference API.
pub struct HuggingFaceClassifier {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    token: Option<String>,
    device: ClassifierDevice,
}

impl HuggingFaceClassifier {
    pub fn from_config(cfg: &ForensicsConfig) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.service_timeout_secs))
            .build()
            .map_err(|err| {
                AnalysisError::ClassificationService(format!("http client error: {err}"))
            })?;
        Ok(Self {
            http,
            endpoint: cfg.classifier_endpoint.trim_end_matches('/').to_string(),
            model: cfg.classifier_model.clone(),
            token: cfg.classifier_token.clone(),
            device: cfg.device,
        })
    }

    fn request_body(&self, image: &NormalizedImage) -> Value {
        let mut options = json!({ "wait_for_model": true });
        match self.device {
            ClassifierDevice::Auto => {}
            ClassifierDevice::Cpu => options["use_gpu"] = json!(false),
            ClassifierDevice::Accelerator => options["use_gpu"] = json!(true),
        }
        json!({
            "inputs": STANDARD.encode(image.as_bytes()),
            "options": options,
        })
    }
}

#[async_trait]
impl ImageClassifier for HuggingFaceClassifier {
    async fn classify(
        &self,
        image: &NormalizedImage,
    ) -> Result<ClassificationResult, AnalysisError> {
        let mut request = self
            .http
            .post(format!("{}/{}", self.endpoint, self.model))
            .json(&self.request_body(image));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AnalysisError::ClassificationService(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AnalysisError::ClassificationService(err.to_string()))?;
        if !status.is_success() {
            return Err(AnalysisError::ClassificationService(format!(
                "{} responded with {status}: {body}",
                self.model
            )));
        }

        parse_label_scores(&body).map(ClassificationResult::new)
    }
}

/// Accepts `[{label, score}]`, the batched `[[{label, score}]]` shape and
/// surfaces `{"error": ...}` bodies.
fn parse_label_scores(body: &str) -> Result<Vec<LabelScore>, AnalysisError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| AnalysisError::ClassificationService(format!("malformed response: {err}")))?;

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(AnalysisError::ClassificationService(error.to_string()));
    }

    let entries = match value {
        Value::Array(items) if items.first().map(Value::is_array).unwrap_or(false) => {
            items.into_iter().next().unwrap_or_default()
        }
        other => other,
    };
    serde_json::from_value(entries)
        .map_err(|err| AnalysisError::ClassificationService(format!("unexpected response: {err}")))
}

type ClassifierFactory =
    Box<dyn Fn() -> Result<Arc<dyn ImageClassifier>, AnalysisError> + Send + Sync>;

/// Classifier handle built on first use and shared read-only afterwards.
/// Concurrent first callers wait on the same one-time initialization; a failed
/// initialization is retried by the next call.
pub struct LazyClassifier {
    cell: OnceCell<Arc<dyn ImageClassifier>>,
    factory: ClassifierFactory,
}

impl LazyClassifier {
    pub fn new(
        factory: impl Fn() -> Result<Arc<dyn ImageClassifier>, AnalysisError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            cell: OnceCell::new(),
            factory: Box::new(factory),
        }
    }

    pub fn huggingface(cfg: ForensicsConfig) -> Self {
        Self::new(move || {
            tracing::info!(
                model = %cfg.classifier_model,
                device = ?cfg.device,
                "initializing classifier"
            );
            Ok(Arc::new(HuggingFaceClassifier::from_config(&cfg)?) as Arc<dyn ImageClassifier>)
        })
    }

    pub async fn handle(&self) -> Result<&Arc<dyn ImageClassifier>, AnalysisError> {
        self.cell
            .get_or_try_init(|| async { (self.factory)() })
            .await
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

#[async_trait]
impl ImageClassifier for LazyClassifier {
    async fn classify(
        &self,
        image: &NormalizedImage,
    ) -> Result<ClassificationResult, AnalysisError> {
        self.handle().await?.classify(image).await
    }
}
