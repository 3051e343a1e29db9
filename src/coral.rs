//! Coral server session: connection URL, mention polling and replies.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{CoralConfig, CoralTransportKind};
use crate::error::{ForensicError, Result};
use crate::mcp::{
    HttpTransport, McpClient, McpTools, McpTransport, ReconnectingTransport, SseTransport,
};
use crate::tool::ToolRegistry;

pub const WAIT_FOR_MENTIONS: &str = "wait_for_mentions";
pub const SEND_MESSAGE: &str = "send_message";

/// Coral tools the mention loop drives itself; never handed to the model.
pub const LOOP_TOOLS: [&str; 2] = [WAIT_FOR_MENTIONS, SEND_MESSAGE];

/// Message in which another agent mentioned this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub thread_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub content: String,
}

/// Append `agentId` and `agentDescription` to the configured server URL.
pub fn coral_connection_url(cfg: &CoralConfig) -> String {
    let separator = if cfg.url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}agentId={}&agentDescription={}",
        cfg.url,
        separator,
        urlencoding::encode(&cfg.agent_id),
        urlencoding::encode(&cfg.agent_description)
    )
}

#[derive(Deserialize)]
struct MentionEnvelope {
    #[serde(default)]
    messages: Vec<Mention>,
}

fn element_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<\w*Message((?:\s+[\w-]+\s*=\s*"[^"]*")*)\s*/?>"#).expect("valid regex")
    })
}

fn attribute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"([\w-]+)\s*=\s*"([^"]*)""#).expect("valid regex"))
}

/// Extract mentions from a `wait_for_mentions` result.
///
/// Accepts a JSON object with a `messages` array, a bare JSON array, or the
/// XML-style listing with one `<...Message threadId="" senderId="" content=""/>`
/// element per mention. Anything else (e.g. "No new messages") yields nothing.
pub fn parse_mentions(text: &str) -> Vec<Mention> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let parsed = match value {
            Value::Array(_) => serde_json::from_value::<Vec<Mention>>(value),
            other => serde_json::from_value::<MentionEnvelope>(other).map(|env| env.messages),
        };
        return match parsed {
            Ok(mentions) => mentions,
            Err(err) => {
                tracing::warn!(error = %err, "unrecognised mention payload");
                Vec::new()
            }
        };
    }

    element_pattern()
        .captures_iter(trimmed)
        .filter_map(|element| {
            let attrs = element.get(1)?.as_str();
            let mut thread_id = None;
            let mut sender_id = None;
            let mut content = String::new();
            for attr in attribute_pattern().captures_iter(attrs) {
                let value = unescape(&attr[2]);
                match &attr[1] {
                    "threadId" => thread_id = Some(value),
                    "senderId" => sender_id = Some(value),
                    "content" => content = value,
                    _ => {}
                }
            }
            Some(Mention {
                thread_id: thread_id?,
                sender_id: sender_id?,
                content,
            })
        })
        .collect()
}

fn unescape(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// An initialized MCP session with a Coral server.
#[derive(Clone)]
pub struct CoralSession {
    client: Arc<McpClient>,
    mention_timeout_ms: u64,
}

impl CoralSession {
    pub fn new(client: Arc<McpClient>, mention_timeout_ms: u64) -> Self {
        Self {
            client,
            mention_timeout_ms,
        }
    }

    /// Connect with the configured transport and run the MCP handshake.
    pub async fn connect(cfg: &CoralConfig) -> Result<Self> {
        let url = coral_connection_url(cfg);
        let timeout = Duration::from_millis(cfg.request_timeout_ms);
        tracing::info!(
            agent_id = %cfg.agent_id,
            transport = ?cfg.transport,
            "connecting to Coral server"
        );

        let transport: Arc<dyn McpTransport> = match cfg.transport {
            CoralTransportKind::Sse => {
                let sse = ReconnectingTransport::connect(move || {
                    let url = url.clone();
                    async move {
                        let transport: Arc<dyn McpTransport> =
                            Arc::new(SseTransport::connect(&url, timeout).await?);
                        Ok(transport)
                    }
                })
                .await?;
                Arc::new(sse)
            }
            CoralTransportKind::Http => Arc::new(HttpTransport::new(url, timeout)),
        };
        let client = McpClient::connect(transport).await?;
        Ok(Self::new(Arc::new(client), cfg.mention_timeout_ms))
    }

    pub fn client(&self) -> &Arc<McpClient> {
        &self.client
    }

    /// Register the server's tools except the ones the mention loop owns.
    pub async fn register_tools(&self, registry: &mut ToolRegistry) -> Result<usize> {
        McpTools::new(Arc::clone(&self.client))
            .excluding(LOOP_TOOLS)
            .register_tools(registry)
            .await
    }

    /// Block (server side) until mentions arrive or the mention timeout passes.
    pub async fn wait_for_mentions(&self) -> Result<Vec<Mention>> {
        let result = self
            .client
            .call_tool(
                WAIT_FOR_MENTIONS,
                json!({ "timeoutMs": self.mention_timeout_ms }),
            )
            .await?;
        let text = result.text();
        if result.is_error {
            return Err(ForensicError::Mcp(format!(
                "{WAIT_FOR_MENTIONS} failed: {text}"
            )));
        }
        Ok(parse_mentions(&text))
    }

    /// Post `content` to `thread_id`, mentioning `recipient`.
    pub async fn send_message(
        &self,
        thread_id: &str,
        recipient: &str,
        content: &str,
    ) -> Result<()> {
        let result = self
            .client
            .call_tool(
                SEND_MESSAGE,
                json!({
                    "threadId": thread_id,
                    "content": content,
                    "mentions": [recipient],
                }),
            )
            .await?;
        if result.is_error {
            return Err(ForensicError::Mcp(format!(
                "{SEND_MESSAGE} failed: {}",
                result.text()
            )));
        }
        tracing::debug!(thread_id, recipient, "reply sent");
        Ok(())
    }
}
