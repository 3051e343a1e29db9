//! MCP (Model Context Protocol) client support.
//!
//! The forensic agent reaches the Coral server through MCP: Coral's thread and
//! mention operations are exposed as MCP tools, listed once at startup and then
//! called over the same session.
//!
//! # Transport Types
//! - **SSE**: `GET` an event stream, learn the POST endpoint from the first
//!   `endpoint` event, send JSON-RPC requests by POST and receive responses as
//!   `message` events on the stream.
//! - **HTTP**: plain JSON-RPC request/response over POST.
//!
//! [`ReconnectingTransport`] wraps a transport factory: once the stream ends it
//! opens a new connection on the next request and replays the initialize
//! handshake, so an [`McpClient`] and the tools built on it stay usable.
//!
//! # Example
//! ```rust,ignore
//! use fact_forensic::mcp::{McpClient, SseTransport};
//!
//! let transport = SseTransport::connect(url, Duration::from_secs(300)).await?;
//! let client = McpClient::connect(Arc::new(transport)).await?;
//! let tools = client.list_tools().await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{Future, FutureExt, StreamExt};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{ForensicError, Result};
use crate::tool::{Tool, ToolRegistry};

const PROTOCOL_VERSION: &str = "2024-11-05";

// ─────────────────────────────────────────────────────────────────────────────
// MCP Protocol Types
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC request structure
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: 0,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification (no id, no response)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: None,
        }
    }
}

/// JSON-RPC response structure
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// MCP Tool definition from a server
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// MCP list_tools response
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpToolDefinition>,
}

/// MCP call_tool result content
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    #[serde(rename = "resource")]
    Resource { resource: Value },
}

/// MCP call_tool result
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Text items joined by newlines; non-text items are rendered as placeholders.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ContentItem::Text { text } => text.clone(),
                ContentItem::Image { .. } => "[image]".to_string(),
                ContentItem::Resource { resource } => format!("[Resource: {}]", resource),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// MCP server capabilities
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

/// MCP initialize result
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP server info
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Transport layer for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and receive a response
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; no response is expected
    async fn notify(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Close the transport
    async fn close(&self) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Transport that communicates with an MCP server via HTTP
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url: url.into(),
            request_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        request.id = self.request_id.fetch_add(1, Ordering::SeqCst);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ForensicError::Mcp(format!("HTTP request failed: {}", e)))?;

        response
            .json()
            .await
            .map_err(|e| ForensicError::Mcp(format!("Failed to parse response: {}", e)))
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&notification)
            .send()
            .await
            .map_err(|e| ForensicError::Mcp(format!("HTTP notification failed: {}", e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE Transport
// ─────────────────────────────────────────────────────────────────────────────

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Transport that talks to an MCP server over server-sent events.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    pending: PendingMap,
    request_id: AtomicU64,
    timeout: Duration,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl SseTransport {
    /// Open the event stream and wait (up to `timeout`) for the server to
    /// announce its message endpoint. `timeout` also bounds every request.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let base = reqwest::Url::parse(url)
            .map_err(|e| ForensicError::Mcp(format!("invalid SSE url `{url}`: {e}")))?;
        // No client-wide timeout: it would cut the long-lived event stream.
        let client = reqwest::Client::new();
        let mut source = EventSource::new(client.get(base.clone()))
            .map_err(|e| ForensicError::Mcp(format!("Failed to open SSE stream: {e}")))?;
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        let announced = tokio::time::timeout(timeout, wait_for_endpoint(&mut source))
            .await
            .map_err(|_| {
                ForensicError::Mcp("timed out waiting for the SSE endpoint event".into())
            })??;
        let endpoint = base
            .join(announced.trim())
            .map_err(|e| ForensicError::Mcp(format!("invalid endpoint `{announced}`: {e}")))?;
        tracing::debug!(%endpoint, "MCP SSE session established");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();
        tokio::spawn(read_events(
            source,
            Arc::clone(&pending),
            Arc::clone(&closed),
            shutdown.clone(),
        ));

        Ok(Self {
            client,
            endpoint,
            pending,
            request_id: AtomicU64::new(1),
            timeout,
            closed,
            shutdown,
        })
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, body: &B) -> Result<()> {
        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(self.endpoint.clone()).json(body).send(),
        )
        .await
        .map_err(|_| ForensicError::Mcp("timed out posting to MCP server".into()))?
        .map_err(|e| ForensicError::Mcp(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForensicError::Mcp(format!(
                "MCP server rejected message with {status}: {body}"
            )));
        }
        Ok(())
    }
}

async fn wait_for_endpoint(source: &mut EventSource) -> Result<String> {
    while let Some(event) = source.next().await {
        match event {
            Ok(Event::Message(message)) if message.event == "endpoint" => return Ok(message.data),
            Ok(_) => continue,
            Err(err) => return Err(ForensicError::Mcp(format!("SSE connection failed: {err}"))),
        }
    }
    Err(ForensicError::Mcp(
        "SSE stream ended before an endpoint was announced".into(),
    ))
}

async fn read_events(
    mut source: EventSource,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = source.next() => match event {
                None => break,
                Some(Ok(Event::Message(message))) if message.event == "message" => {
                    dispatch_response(&message.data, &pending);
                }
                Some(Ok(_)) => {}
                Some(Err(reqwest_eventsource::Error::StreamEnded)) => break,
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "MCP SSE stream failed");
                    break;
                }
            }
        }
    }

    source.close();
    closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a "connection closed" error.
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
    tracing::info!("MCP SSE stream closed");
}

fn dispatch_response(data: &str, pending: &PendingMap) {
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed MCP message");
            return;
        }
    };
    if value.get("method").is_some() {
        tracing::debug!(method = ?value.get("method"), "ignoring server-initiated MCP message");
        return;
    }
    let response: JsonRpcResponse = match serde_json::from_value(value) {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring MCP message without a usable id");
            return;
        }
    };
    let waiter = pending
        .lock()
        .ok()
        .and_then(|mut pending| pending.remove(&response.id));
    match waiter {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => tracing::debug!(id = response.id, "no waiter for MCP response"),
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ForensicError::ConnectionClosed {
                reason: "SSE stream has ended".into(),
                request_sent: false,
            });
        }
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        request.id = id;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| ForensicError::Mcp("pending request table poisoned".into()))?
            .insert(id, tx);
        // The reader may have cleared the table between the check above and the insert.
        if self.closed.load(Ordering::SeqCst) {
            self.forget(id);
            return Err(ForensicError::ConnectionClosed {
                reason: "SSE stream has ended".into(),
                request_sent: false,
            });
        }

        if let Err(err) = self.post(&request).await {
            self.forget(id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ForensicError::ConnectionClosed {
                reason: format!("SSE stream ended before the `{}` response", request.method),
                request_sent: true,
            }),
            Err(_) => {
                self.forget(id);
                Err(ForensicError::Mcp(format!(
                    "timed out waiting for `{}` response",
                    request.method
                )))
            }
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        self.post(&notification).await
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconnecting Transport
// ─────────────────────────────────────────────────────────────────────────────

type Connector = Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn McpTransport>>> + Send + Sync>;

/// Re-opens the underlying transport after its connection closes.
///
/// The `initialize` request seen on the first connection is replayed, followed
/// by `notifications/initialized`, before anything else goes over a new one. A
/// request the old connection refused without sending is retried once on the
/// new connection; a request that may have reached the server is not resent and
/// its error is returned, with the reconnect left to the next call.
pub struct ReconnectingTransport {
    connect: Connector,
    current: tokio::sync::Mutex<Option<Arc<dyn McpTransport>>>,
    handshake: Mutex<Option<JsonRpcRequest>>,
    reconnects: AtomicU64,
    closed: AtomicBool,
}

impl ReconnectingTransport {
    /// Open the first connection with `connect`, which is called again for
    /// every reconnect.
    pub async fn connect<F, Fut>(connect: F) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn McpTransport>>> + Send + 'static,
    {
        let connect: Connector = Box::new(move || connect().boxed());
        let first = connect().await?;
        Ok(Self {
            connect,
            current: tokio::sync::Mutex::new(Some(first)),
            handshake: Mutex::new(None),
            reconnects: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Connections opened after the first one.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    async fn transport(&self) -> Result<Arc<dyn McpTransport>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ForensicError::ConnectionClosed {
                reason: "transport was closed".into(),
                request_sent: false,
            });
        }

        let mut current = self.current.lock().await;
        if let Some(transport) = current.as_ref() {
            return Ok(Arc::clone(transport));
        }

        tracing::info!("reconnecting to MCP server");
        let transport = (self.connect)().await?;
        let handshake = self.handshake.lock().ok().and_then(|stored| stored.clone());
        if let Some(initialize) = handshake {
            let response = transport.send(initialize).await?;
            if let Some(error) = response.error {
                return Err(ForensicError::Mcp(format!(
                    "re-initialize failed: {}",
                    error.message
                )));
            }
            transport
                .notify(JsonRpcNotification::new("notifications/initialized"))
                .await?;
        }
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        *current = Some(Arc::clone(&transport));
        Ok(transport)
    }

    async fn invalidate(&self, stale: &Arc<dyn McpTransport>) {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|live| Arc::ptr_eq(live, stale)) {
            *current = None;
        }
    }
}

#[async_trait]
impl McpTransport for ReconnectingTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if request.method == "initialize" {
            if let Ok(mut handshake) = self.handshake.lock() {
                *handshake = Some(request.clone());
            }
        }

        let mut retried = false;
        loop {
            let transport = self.transport().await?;
            match transport.send(request.clone()).await {
                Err(ForensicError::ConnectionClosed {
                    reason,
                    request_sent,
                }) => {
                    tracing::warn!(%reason, method = %request.method, "MCP connection lost");
                    self.invalidate(&transport).await;
                    if request_sent || retried || self.closed.load(Ordering::SeqCst) {
                        return Err(ForensicError::ConnectionClosed {
                            reason,
                            request_sent,
                        });
                    }
                    retried = true;
                }
                other => return other,
            }
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        self.transport().await?.notify(notification).await
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let current = self.current.lock().await.take();
        match current {
            Some(transport) => transport.close().await,
            None => Ok(()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Client
// ─────────────────────────────────────────────────────────────────────────────

/// MCP client for connecting to MCP servers. Shareable once initialized.
pub struct McpClient {
    transport: Arc<dyn McpTransport>,
    server_info: Option<ServerInfo>,
    capabilities: Option<ServerCapabilities>,
}

impl McpClient {
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        Self {
            transport,
            server_info: None,
            capabilities: None,
        }
    }

    /// Create a client and run the initialize handshake.
    pub async fn connect(transport: Arc<dyn McpTransport>) -> Result<Self> {
        let mut client = Self::new(transport);
        client.initialize().await?;
        Ok(client)
    }

    /// Initialize the connection to the MCP server
    pub async fn initialize(&mut self) -> Result<&ServerInfo> {
        if self.server_info.is_none() {
            let request = JsonRpcRequest::new(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            );

            let result: InitializeResult = self.request(request, "initialize").await?;
            tracing::info!(
                server = %result.server_info.name,
                protocol = %result.protocol_version,
                "MCP session initialized"
            );
            self.capabilities = Some(result.capabilities);
            self.server_info = Some(result.server_info);

            self.transport
                .notify(JsonRpcNotification::new("notifications/initialized"))
                .await?;
        }

        self.server_info
            .as_ref()
            .ok_or_else(|| ForensicError::Mcp("Server info not available".into()))
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        request: JsonRpcRequest,
        what: &str,
    ) -> Result<T> {
        let response = self.transport.send(request).await?;

        if let Some(error) = response.error {
            return Err(ForensicError::Mcp(format!(
                "{what} failed: {}",
                error.message
            )));
        }

        serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|e| ForensicError::Mcp(format!("Failed to parse {what} result: {}", e)))
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.server_info.is_none() {
            return Err(ForensicError::Mcp("MCP client is not initialized".into()));
        }
        Ok(())
    }

    /// List available tools from the MCP server
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>> {
        self.ensure_initialized()?;
        let result: ListToolsResult = self
            .request(JsonRpcRequest::new("tools/list", None), "list_tools")
            .await?;
        Ok(result.tools)
    }

    /// Call a tool on the MCP server
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.ensure_initialized()?;
        let request = JsonRpcRequest::new(
            "tools/call",
            Some(serde_json::json!({
                "name": name,
                "arguments": arguments
            })),
        );
        self.request(request, "call_tool").await
    }

    /// Close the MCP client
    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    pub fn is_initialized(&self) -> bool {
        self.server_info.is_some()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.capabilities.as_ref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Tools Integration
// ─────────────────────────────────────────────────────────────────────────────

/// Creates registry tools from the tools an MCP server exposes.
pub struct McpTools {
    client: Arc<McpClient>,
    tool_prefix: Option<String>,
    excluded: Vec<String>,
}

impl McpTools {
    pub fn new(client: Arc<McpClient>) -> Self {
        Self {
            client,
            tool_prefix: None,
            excluded: Vec::new(),
        }
    }

    /// Set a prefix for all tool names
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_prefix = Some(prefix.into());
        self
    }

    /// Skip server tools with these names
    pub fn excluding<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(names.into_iter().map(Into::into));
        self
    }

    /// Get tools and register them with a ToolRegistry
    pub async fn register_tools(&self, registry: &mut ToolRegistry) -> Result<usize> {
        let tools = self.client.list_tools().await?;

        let mut count = 0;
        for tool_def in tools {
            if self.excluded.iter().any(|name| name == &tool_def.name) {
                continue;
            }
            let name = match &self.tool_prefix {
                Some(prefix) => format!("{}_{}", prefix, tool_def.name),
                None => tool_def.name.clone(),
            };

            let description = tool_def
                .description
                .unwrap_or_else(|| format!("MCP tool: {}", tool_def.name));

            registry.register(McpToolWrapper {
                name,
                description,
                parameters: tool_def.input_schema,
                client: Arc::clone(&self.client),
                mcp_tool_name: tool_def.name,
            });
            count += 1;
        }

        Ok(count)
    }
}

/// Wrapper that implements Tool for an MCP tool
struct McpToolWrapper {
    name: String,
    description: String,
    parameters: Value,
    client: Arc<McpClient>,
    mcp_tool_name: String,
}

#[async_trait]
impl Tool for McpToolWrapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Option<Value> {
        Some(self.parameters.clone())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let result = self.client.call_tool(&self.mcp_tool_name, input).await?;

        if result.is_error {
            return Ok(serde_json::json!({
                "error": true,
                "content": result.text()
            }));
        }

        let mut text_content = Vec::new();
        let mut images = Vec::new();

        for item in result.content {
            match item {
                ContentItem::Text { text } => text_content.push(text),
                ContentItem::Image { data, mime_type } => {
                    images.push(serde_json::json!({
                        "type": "image",
                        "data": data,
                        "mimeType": mime_type.unwrap_or_else(|| "image/png".to_string())
                    }));
                }
                ContentItem::Resource { resource } => {
                    text_content.push(format!("[Resource: {}]", resource));
                }
            }
        }

        if images.is_empty() {
            Ok(serde_json::json!({
                "content": text_content.join("\n")
            }))
        } else {
            Ok(serde_json::json!({
                "content": text_content.join("\n"),
                "images": images
            }))
        }
    }
}
