//! Tavily web search.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::error::{ForensicError, Result};
use crate::tool::Tool;

pub const TAVILY_SEARCH_TOOL: &str = "tavily_search";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub query: String,
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub images: Vec<Value>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
    topic: &'a str,
    include_images: bool,
}

pub struct TavilySearchTool {
    client: reqwest::Client,
    api_key: String,
    config: SearchConfig,
}

impl TavilySearchTool {
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| {
                ForensicError::Config("TAVILY_API_KEY is required for web search".into())
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ForensicError::Config(format!("http client error: {e}")))?;
        Ok(Self {
            client,
            api_key,
            config: config.clone(),
        })
    }

    fn invocation_error(e: reqwest::Error) -> ForensicError {
        ForensicError::ToolInvocation {
            name: TAVILY_SEARCH_TOOL.into(),
            source: Box::new(e),
        }
    }

    pub async fn search(&self, query: &str, max_results: usize) -> Result<SearchResponse> {
        let request = SearchRequest {
            query,
            max_results,
            topic: &self.config.topic,
            include_images: self.config.include_images,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(Self::invocation_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForensicError::Protocol(format!(
                "search failed with {status}: {body}"
            )));
        }

        response.json().await.map_err(Self::invocation_error)
    }
}

#[async_trait]
impl Tool for TavilySearchTool {
    fn name(&self) -> &str {
        TAVILY_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search the web for sources that confirm or refute a claim. \
         Expects {\"query\": string, \"max_results\": number (optional)}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "max_results": {"type": "integer", "minimum": 1}
            },
            "required": ["query"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let query = input
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ForensicError::Protocol(format!("missing `query` for {TAVILY_SEARCH_TOOL}"))
            })?;

        let max_results = input
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n.max(1) as usize)
            .unwrap_or(self.config.max_results);

        let response = self.search(query, max_results).await?;
        tracing::debug!(query, results = response.results.len(), "web search finished");
        Ok(serde_json::to_value(response)?)
    }
}
