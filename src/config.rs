use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ForensicError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4.1".into()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    8000
}

fn default_model_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoralTransportKind {
    #[default]
    Sse,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoralConfig {
    #[serde(default = "default_coral_url")]
    pub url: String,
    #[serde(default)]
    pub transport: CoralTransportKind,
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    #[serde(default = "default_agent_description")]
    pub agent_description: String,
    /// Timeout applied to every JSON-RPC round trip with the server.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// `timeoutMs` passed to `wait_for_mentions`.
    #[serde(default = "default_mention_timeout_ms")]
    pub mention_timeout_ms: u64,
}

impl Default for CoralConfig {
    fn default() -> Self {
        Self {
            url: default_coral_url(),
            transport: CoralTransportKind::default(),
            agent_id: default_agent_id(),
            agent_description: default_agent_description(),
            request_timeout_ms: default_request_timeout_ms(),
            mention_timeout_ms: default_mention_timeout_ms(),
        }
    }
}

fn default_coral_url() -> String {
    "http://localhost:5555/devmode/exampleApplication/privkey/session1/sse".into()
}

fn default_agent_id() -> String {
    "exampleAgentId".into()
}

fn default_agent_description() -> String {
    "An agent that analyses stories and determines if it is fake".into()
}

fn default_request_timeout_ms() -> u64 {
    300_000
}

fn default_mention_timeout_ms() -> u64 {
    30_000
}

/// Where the classifier should run. Forwarded to the inference service as a hint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierDevice {
    #[default]
    Auto,
    Cpu,
    Accelerator,
}

impl FromStr for ClassifierDevice {
    type Err = ForensicError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "accelerator" | "gpu" | "cuda" => Ok(Self::Accelerator),
            other => Err(ForensicError::Config(format!(
                "unknown classifier device `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForensicsConfig {
    #[serde(default)]
    pub mistral_api_key: Option<String>,
    #[serde(default = "default_mistral_base_url")]
    pub mistral_base_url: String,
    #[serde(default = "default_description_model")]
    pub description_model: String,
    #[serde(default = "default_description_prompt")]
    pub description_prompt: String,
    #[serde(default = "default_classifier_endpoint")]
    pub classifier_endpoint: String,
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    #[serde(default)]
    pub classifier_token: Option<String>,
    #[serde(default)]
    pub device: ClassifierDevice,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_service_timeout_secs")]
    pub service_timeout_secs: u64,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

impl Default for ForensicsConfig {
    fn default() -> Self {
        Self {
            mistral_api_key: None,
            mistral_base_url: default_mistral_base_url(),
            description_model: default_description_model(),
            description_prompt: default_description_prompt(),
            classifier_endpoint: default_classifier_endpoint(),
            classifier_model: default_classifier_model(),
            classifier_token: None,
            device: ClassifierDevice::default(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            service_timeout_secs: default_service_timeout_secs(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_mistral_base_url() -> String {
    "https://api.mistral.ai/v1".into()
}

fn default_description_model() -> String {
    "pixtral-12b-2409".into()
}

fn default_description_prompt() -> String {
    "What's in this image?".into()
}

fn default_classifier_endpoint() -> String {
    "https://api-inference.huggingface.co/models".into()
}

fn default_classifier_model() -> String {
    "prithivMLmods/Deep-Fake-Detector-v2-Model".into()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_service_timeout_secs() -> u64 {
    120
}

fn default_max_image_bytes() -> usize {
    20 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_include_images")]
    pub include_images: bool,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
            topic: default_topic(),
            include_images: default_include_images(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".into()
}

fn default_max_results() -> usize {
    5
}

fn default_topic() -> String {
    "general".into()
}

fn default_include_images() -> bool {
    true
}

fn default_search_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    #[serde(default = "default_success_delay_ms")]
    pub success_delay_ms: u64,
    #[serde(default = "default_failure_delay_ms")]
    pub failure_delay_ms: u64,
    #[serde(default)]
    pub max_iterations: Option<u64>,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Failure and event records kept by the supervisor's telemetry.
    #[serde(default = "default_telemetry_capacity")]
    pub telemetry_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            success_delay_ms: default_success_delay_ms(),
            failure_delay_ms: default_failure_delay_ms(),
            max_iterations: None,
            max_steps: default_max_steps(),
            telemetry_capacity: default_telemetry_capacity(),
        }
    }
}

fn default_success_delay_ms() -> u64 {
    1_000
}

fn default_failure_delay_ms() -> u64 {
    5_000
}

fn default_telemetry_capacity() -> usize {
    crate::telemetry::DEFAULT_CAPACITY
}

fn default_max_steps() -> usize {
    15
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub coral: CoralConfig,
    #[serde(default)]
    pub forensics: ForensicsConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| ForensicError::Config(format!("Failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(model) = env::var("MODEL_NAME") {
            self.model.model = model;
        }
        if let Ok(provider) = env::var("MODEL_PROVIDER") {
            self.model.provider = provider;
        }
        if let Ok(key) = env::var("MODEL_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(temperature) = parsed_var::<f32>("MODEL_TEMPERATURE") {
            self.model.temperature = temperature.clamp(0.0, 2.0);
        }
        if let Some(max_tokens) = parsed_var::<u32>("MODEL_MAX_TOKENS") {
            self.model.max_tokens = max_tokens;
        }
        if let Ok(base_url) = env::var("MODEL_BASE_URL") {
            self.model.base_url = Some(base_url);
        }

        if let Ok(url) = env::var("CORAL_SSE_URL") {
            self.coral.url = url;
        }
        if let Ok(agent_id) = env::var("CORAL_AGENT_ID") {
            self.coral.agent_id = agent_id;
        }
        if let Some(timeout) = parsed_var::<u64>("TIMEOUT_MS") {
            self.coral.request_timeout_ms = timeout;
        }

        if let Ok(key) = env::var("MISTRAL_API_KEY") {
            self.forensics.mistral_api_key = Some(key);
        }
        if let Ok(token) = env::var("HF_TOKEN") {
            self.forensics.classifier_token = Some(token);
        }
        if let Some(device) = parsed_var::<ClassifierDevice>("FORENSICS_DEVICE") {
            self.forensics.device = device;
        }

        if let Ok(key) = env::var("TAVILY_API_KEY") {
            self.search.api_key = Some(key);
        }

        if let Ok(format) = env::var("LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            };
        }
    }
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}
