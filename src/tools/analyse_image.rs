//! `analyse-image-tool`: the forensics pipeline exposed to the agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ForensicsConfig;
use crate::error::{ForensicError, Result};
use crate::forensics::ImageForensicsTool;
use crate::tool::Tool;

pub const ANALYSE_IMAGE_TOOL: &str = "analyse-image-tool";

pub struct AnalyseImageTool {
    forensics: Arc<ImageForensicsTool>,
}

impl AnalyseImageTool {
    pub fn new(forensics: Arc<ImageForensicsTool>) -> Self {
        Self { forensics }
    }

    pub fn from_config(cfg: &ForensicsConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(ImageForensicsTool::from_config(cfg)?)))
    }
}

#[async_trait]
impl Tool for AnalyseImageTool {
    fn name(&self) -> &str {
        ANALYSE_IMAGE_TOOL
    }

    fn description(&self) -> &str {
        "Describe the image at a URL and judge how likely it is to be a deepfake. \
         Returns {\"description\": string, \
         \"deepfake-score\": \"unlikely\" | \"unknown\" | \"likely\"}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL of the image to analyse"}
            },
            "required": ["url"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let url = input
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                ForensicError::Protocol(format!("missing `url` for {ANALYSE_IMAGE_TOOL}"))
            })?;

        let result = self.forensics.analyse(url.trim()).await?;
        Ok(serde_json::to_value(result)?)
    }
}
