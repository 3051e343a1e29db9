//! Drives the SSE MCP transport, the Coral session and the supervised mention
//! loop against an in-process Coral stand-in.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fact_forensic::prompt::coral_system_prompt;
use fact_forensic::supervisor::{FixedBackoff, Iteration};
use fact_forensic::{
    Agent, AgentResponder, CoralConfig, CoralSession, MentionLoop, StubModel, Supervisor,
    SupervisorReport, ToolRegistry,
};

#[derive(Default)]
struct MockCoral {
    stream: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    connections: AtomicUsize,
    mentions: Mutex<VecDeque<Value>>,
    sent: Mutex<Vec<Value>>,
    notifications: Mutex<Vec<String>>,
}

impl MockCoral {
    fn with_mentions(batches: Vec<Value>) -> Arc<Self> {
        let coral = Self::default();
        *coral.mentions.lock().unwrap() = batches.into();
        Arc::new(coral)
    }

    fn text(text: impl Into<String>) -> Value {
        json!({"content": [{"type": "text", "text": text.into()}]})
    }

    fn result_for(&self, method: &str, params: &Value) -> Value {
        match method {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "coral-server", "version": "test"}
            }),
            "tools/list" => json!({"tools": [
                {
                    "name": "list_agents",
                    "description": "List registered agents",
                    "inputSchema": {"type": "object"}
                },
                {"name": "wait_for_mentions", "inputSchema": {"type": "object"}},
                {"name": "send_message", "inputSchema": {"type": "object"}}
            ]}),
            "tools/call" => match params["name"].as_str() {
                Some("wait_for_mentions") => {
                    let next = self.mentions.lock().unwrap().pop_front();
                    match next {
                        Some(batch) => Self::text(batch.to_string()),
                        None => Self::text("No new messages received within the timeout period"),
                    }
                }
                Some("send_message") => {
                    self.sent.lock().unwrap().push(params["arguments"].clone());
                    Self::text("Message sent")
                }
                Some("list_agents") => Self::text("interface_agent, fact_forensic"),
                _ => json!({
                    "isError": true,
                    "content": [{"type": "text", "text": "unknown tool"}]
                }),
            },
            _ => json!({}),
        }
    }
}

async fn open_stream(
    State(coral): State<Arc<MockCoral>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(Event::default().event("endpoint").data("/message?sessionId=s1"))
        .unwrap();
    *coral.stream.lock().unwrap() = Some(tx);
    coral.connections.fetch_add(1, Ordering::SeqCst);

    Sse::new(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    }))
}

async fn post_message(
    State(coral): State<Arc<MockCoral>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    let Some(id) = body.get("id").cloned() else {
        coral.notifications.lock().unwrap().push(method);
        return StatusCode::ACCEPTED;
    };

    // Without an open stream the request is refused before it has any effect.
    let Some(stream) = coral.stream.lock().unwrap().clone() else {
        return StatusCode::GONE;
    };
    let result = coral.result_for(&method, &body["params"]);
    let response = json!({"jsonrpc": "2.0", "id": id, "result": result});
    match stream.send(Event::default().event("message").data(response.to_string())) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::GONE,
    }
}

async fn spawn(coral: Arc<MockCoral>) -> SocketAddr {
    let app = Router::new()
        .route("/sse", get(open_stream))
        .route("/message", post(post_message))
        .with_state(coral);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn coral_config(addr: SocketAddr) -> CoralConfig {
    CoralConfig {
        url: format!("http://{addr}/sse"),
        agent_id: "fact_forensic".into(),
        request_timeout_ms: 5_000,
        ..CoralConfig::default()
    }
}

fn mention(content: &str) -> Value {
    json!({"messages": [{
        "threadId": "thread-1",
        "senderId": "interface_agent",
        "content": content
    }]})
}

async fn supervised(
    session: CoralSession,
    model: Arc<StubModel>,
    iterations: u64,
) -> SupervisorReport {
    let mut tools = ToolRegistry::new();
    session.register_tools(&mut tools).await.unwrap();
    let prompt = coral_system_prompt(&tools.describe(), &[]);
    let agent = Agent::new(model).with_system_prompt(prompt).with_tools(tools);

    let mention_loop = MentionLoop::new(session, Arc::new(AgentResponder::new(agent)));
    let backoff = FixedBackoff {
        success: Duration::from_millis(5),
        failure: Duration::from_millis(5),
    };
    Supervisor::new(Arc::new(mention_loop), backoff)
        .with_max_iterations(Some(iterations))
        .run()
        .await
}

#[tokio::test]
async fn sse_session_handshakes_and_hides_loop_tools() {
    let coral = MockCoral::with_mentions(Vec::new());
    let addr = spawn(coral.clone()).await;

    let session = CoralSession::connect(&coral_config(addr)).await.unwrap();
    assert_eq!(session.client().server_info().unwrap().name, "coral-server");
    assert_eq!(
        *coral.notifications.lock().unwrap(),
        vec!["notifications/initialized".to_string()]
    );

    let mut tools = ToolRegistry::new();
    session.register_tools(&mut tools).await.unwrap();
    assert_eq!(tools.names(), vec!["list_agents"]);

    assert!(session.wait_for_mentions().await.unwrap().is_empty());
}

#[tokio::test]
async fn answers_mentions_in_their_thread() {
    let coral = MockCoral::with_mentions(vec![mention(
        "Is https://example.com/flood.jpg a real photo?",
    )]);
    let addr = spawn(coral.clone()).await;
    let session = CoralSession::connect(&coral_config(addr)).await.unwrap();

    let model = StubModel::new(vec![
        r#"{"action":"call_tool","name":"list_agents","arguments":{}}"#.into(),
        r#"{"action":"respond","content":"The photo is unlikely to be a deepfake."}"#.into(),
    ]);
    let report = supervised(session, model.clone(), 2).await;

    assert_eq!(report, SupervisorReport { iterations: 2, failures: 0 });
    let sent = coral.sent.lock().unwrap().clone();
    assert_eq!(
        sent,
        vec![json!({
            "threadId": "thread-1",
            "content": "The photo is unlikely to be a deepfake.",
            "mentions": ["interface_agent"]
        })]
    );

    let transcript = model.requests().pop().unwrap();
    let tool_turn = transcript.iter().find(|m| m.tool_result.is_some()).unwrap();
    assert_eq!(
        tool_turn.tool_result.as_ref().unwrap().output["content"],
        "interface_agent, fact_forensic"
    );
}

#[tokio::test]
async fn failed_answers_reply_error_and_keep_running() {
    let coral = MockCoral::with_mentions(vec![mention("check this"), mention("and this")]);
    let addr = spawn(coral.clone()).await;
    let session = CoralSession::connect(&coral_config(addr)).await.unwrap();

    // No scripted answers: the model call fails.
    let model = StubModel::new(Vec::new());
    let report = supervised(session.clone(), model, 1).await;
    assert_eq!(report, SupervisorReport { iterations: 1, failures: 1 });

    let model = StubModel::new(vec!["Looks authentic".into()]);
    let report = supervised(session, model, 1).await;
    assert_eq!(report.failures, 0);

    let replies: Vec<Value> = coral
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|args| args["content"].clone())
        .collect();
    assert_eq!(replies, vec![json!("error"), json!("Looks authentic")]);
}

#[tokio::test]
async fn reconnects_after_the_event_stream_closes() {
    let coral = MockCoral::with_mentions(vec![mention("Is this photo real?")]);
    let addr = spawn(coral.clone()).await;
    let session = CoralSession::connect(&coral_config(addr)).await.unwrap();

    let model = StubModel::new(vec!["Looks authentic".into(), "Likely manipulated".into()]);
    let responder = AgentResponder::new(Agent::new(model));
    let mention_loop = MentionLoop::new(session, Arc::new(responder));
    let cancel = CancellationToken::new();

    mention_loop.run_once(&cancel).await.unwrap();
    assert_eq!(coral.sent.lock().unwrap().len(), 1);

    // Coral ends the event stream; a new mention is queued behind it.
    coral.stream.lock().unwrap().take();
    coral
        .mentions
        .lock()
        .unwrap()
        .push_back(mention("And this one?"));

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let answered = mention_loop.run_once(&cancel).await.is_ok();
        if answered && coral.sent.lock().unwrap().len() == 2 {
            break;
        }
    }

    let replies: Vec<Value> = coral
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|args| args["content"].clone())
        .collect();
    assert_eq!(replies, vec![json!("Looks authentic"), json!("Likely manipulated")]);
    assert_eq!(coral.connections.load(Ordering::SeqCst), 2);
    assert_eq!(coral.notifications.lock().unwrap().len(), 2);
}
