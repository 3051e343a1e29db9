//! Language model implementations and abstractions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::error::{ForensicError, Result};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescription;

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion>;
}

/// Build the chat model named by `cfg.provider`.
pub fn model_from_config(cfg: &ModelConfig) -> Result<Arc<dyn LanguageModel>> {
    match cfg.provider.to_ascii_lowercase().as_str() {
        "openai" => Ok(Arc::new(OpenAIClient::from_config(cfg)?)),
        "mistral" | "mistralai" => Ok(Arc::new(MistralClient::from_config(cfg)?)),
        other => Err(ForensicError::Config(format!(
            "unsupported model provider `{other}`"
        ))),
    }
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> ForensicError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ForensicError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    ForensicError::LanguageModel(format!("{provider} request failed with {}: {body}", status))
}

fn serialize_tool_arguments(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| args.to_string())
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// How a provider expects `image_url` content parts to be shaped.
#[derive(Clone, Copy)]
enum ImagePartStyle {
    /// `{"image_url": {"url": "..."}}`
    Object,
    /// `{"image_url": "..."}`
    Bare,
}

fn message_content(message: &Message, style: ImagePartStyle) -> Value {
    if message.attachments.is_empty() {
        return Value::String(message.content.clone());
    }
    let mut parts = vec![json!({"type": "text", "text": message.content})];
    for attachment in &message.attachments {
        let image_url = match style {
            ImagePartStyle::Object => json!({ "url": attachment.uri }),
            ImagePartStyle::Bare => json!(attachment.uri),
        };
        parts.push(json!({"type": "image_url", "image_url": image_url}));
    }
    Value::Array(parts)
}

/// Render messages into the OpenAI chat schema shared by OpenAI and Mistral.
fn chat_messages(messages: &[Message], style: ImagePartStyle) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut msg = json!({
                "role": role_name(m.role),
                "content": message_content(m, style),
            });

            if let Some(result) = &m.tool_result {
                msg["content"] = json!(serialize_tool_arguments(&result.output));
                msg["name"] = json!(result.name);
                if let Some(id) = &result.tool_call_id {
                    msg["tool_call_id"] = json!(id);
                }
            }

            if let (Role::Assistant, Some(call)) = (m.role, &m.tool_call) {
                msg["tool_calls"] = json!([{
                    "id": call.id.clone().unwrap_or_default(),
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": serialize_tool_arguments(&call.arguments)
                    }
                }]);
                msg["content"] = Value::Null;
            }

            msg
        })
        .collect()
}

fn chat_tools(tools: &[ToolDescription]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t
                        .parameters
                        .clone()
                        .unwrap_or(json!({"type": "object", "properties": {}}))
                }
            })
        })
        .collect()
}

fn parse_chat_response(body: ChatResponse, provider: &str) -> Result<ModelCompletion> {
    let first = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ForensicError::LanguageModel(format!("{provider} returned no choices")))?;

    let tool_calls = first
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
            ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            }
        })
        .collect();

    Ok(ModelCompletion {
        content: first.message.content.and_then(flatten_content),
        tool_calls,
    })
}

/// Providers return either a string or a list of typed chunks.
fn flatten_content(content: Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text),
        Value::Array(chunks) => {
            let text: String = chunks
                .iter()
                .filter_map(|chunk| chunk.get("text").and_then(Value::as_str))
                .collect();
            Some(text)
        }
        _ => None,
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|err| ForensicError::LanguageModel(format!("http client error: {err}")))
}

#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAIClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            ForensicError::LanguageModel("missing OpenAI API key in model config".into())
        })?;
        Ok(Self {
            http: http_client(cfg.timeout_secs)?,
            model: cfg.model.clone(),
            api_key,
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        let mut payload = json!({
            "model": self.model,
            "messages": chat_messages(messages, ImagePartStyle::Object),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if !tools.is_empty() {
            payload["tools"] = json!(chat_tools(tools));
            payload["tool_choice"] = json!("auto");
        }
        tracing::debug!(model = %self.model, tools = tools.len(), "openai chat request");

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ForensicError::LanguageModel(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        let body: ChatResponse = resp.json().await.map_err(|err| {
            ForensicError::LanguageModel(format!("OpenAI response parse error: {err}"))
        })?;
        parse_chat_response(body, "OpenAI")
    }
}

/// Mistral AI client using their OpenAI-compatible API. Also serves the
/// multimodal `pixtral` models used for image description.
#[derive(Clone)]
pub struct MistralClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl MistralClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            model: "mistral-large-latest".to_string(),
            api_key: api_key.into(),
            base_url: "https://api.mistral.ai/v1".to_string(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            ForensicError::LanguageModel("missing Mistral API key in model config".into())
        })?;
        let mut client = Self::new(api_key).with_model(&cfg.model);
        client.http = http_client(cfg.timeout_secs)?;
        client.temperature = Some(cfg.temperature);
        client.max_tokens = Some(cfg.max_tokens);
        if let Some(base_url) = &cfg.base_url {
            client = client.with_base_url(base_url);
        }
        Ok(client)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }
}

#[async_trait]
impl LanguageModel for MistralClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        let mut body = json!({
            "model": self.model,
            "messages": chat_messages(messages, ImagePartStyle::Bare),
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !tools.is_empty() {
            body["tools"] = json!(chat_tools(tools));
            body["tool_choice"] = json!("auto");
        }
        tracing::debug!(model = %self.model, tools = tools.len(), "mistral chat request");

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ForensicError::LanguageModel(format!("Mistral request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "Mistral"));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ForensicError::LanguageModel(format!("Mistral parse error: {e}")))?;
        parse_chat_response(body, "Mistral")
    }
}

/// A deterministic model used for tests and demos. Responses are consumed in order.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Transcripts received so far, one entry per completion request.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        messages: &[Message],
        _tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        let raw = self
            .responses
            .lock()
            .map_err(|_| ForensicError::LanguageModel("stub model poisoned".into()))?
            .pop_front()
            .ok_or_else(|| {
                ForensicError::LanguageModel("StubModel ran out of scripted responses".into())
            })?;

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelCompletion {
                content: Some(content),
                tool_calls: Vec::new(),
            }),
            Ok(StubDirective::CallTool { name, arguments }) => Ok(ModelCompletion {
                content: None,
                tool_calls: vec![ToolCall {
                    id: Some(format!("call_{name}")),
                    name,
                    arguments,
                }],
            }),
            Err(_) => Ok(ModelCompletion {
                content: Some(raw),
                tool_calls: Vec::new(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ChatFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Attachment;

    #[test]
    fn image_attachments_become_content_parts() {
        let msg = Message::user("What's in this image?")
            .with_attachment(Attachment::inline_image("image/jpeg", b"xyz"));

        let mistral = chat_messages(std::slice::from_ref(&msg), ImagePartStyle::Bare);
        assert_eq!(mistral[0]["content"][0]["text"], "What's in this image?");
        assert_eq!(mistral[0]["content"][1]["image_url"], "data:image/jpeg;base64,eHl6");

        let openai = chat_messages(std::slice::from_ref(&msg), ImagePartStyle::Object);
        assert_eq!(
            openai[0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,eHl6"
        );
    }

    #[test]
    fn tool_round_trip_messages_are_linked_by_id() {
        let call = ToolCall {
            id: Some("call_7".into()),
            name: "tavily_search".into(),
            arguments: json!({"query": "moon landing"}),
        };
        let messages = vec![
            Message::tool_call(call),
            Message::tool("tavily_search", json!({"results": []}), Some("call_7".into())),
        ];

        let rendered = chat_messages(&messages, ImagePartStyle::Object);
        assert_eq!(rendered[0]["tool_calls"][0]["id"], "call_7");
        assert!(rendered[0]["content"].is_null());
        assert_eq!(rendered[1]["role"], "tool");
        assert_eq!(rendered[1]["tool_call_id"], "call_7");
    }

    #[test]
    fn parses_tool_calls_and_chunked_content() {
        let body: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": [{"type": "text", "text": "a "}, {"type": "text", "text": "cat"}],
                    "tool_calls": [{
                        "id": "c1",
                        "function": {
                            "name": "analyse-image-tool",
                            "arguments": "{\"url\":\"http://x\"}"
                        }
                    }]
                }
            }]
        }))
        .unwrap();

        let completion = parse_chat_response(body, "test").unwrap();
        assert_eq!(completion.content.as_deref(), Some("a cat"));
        assert_eq!(completion.tool_calls[0].arguments["url"], "http://x");
    }

    #[test]
    fn empty_choice_list_is_an_error() {
        let body: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            parse_chat_response(body, "Mistral"),
            Err(ForensicError::LanguageModel(_))
        ));
    }

    #[test]
    fn rejects_unknown_provider() {
        let cfg = ModelConfig {
            provider: "carrier-pigeon".into(),
            ..ModelConfig::default()
        };
        assert!(matches!(model_from_config(&cfg), Err(ForensicError::Config(_))));
    }

    #[tokio::test]
    async fn stub_model_replays_directives() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"echo","arguments":{"x":1}}"#.into(),
            "plain text".into(),
        ]);
        let first = model.complete_chat(&[Message::user("hi")], &[]).await.unwrap();
        assert_eq!(first.tool_calls[0].name, "echo");
        let second = model.complete_chat(&[], &[]).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("plain text"));
        assert!(model.complete_chat(&[], &[]).await.is_err());
        assert_eq!(model.requests().len(), 3);
    }
}
