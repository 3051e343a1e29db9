//! Long-running supervision of the Coral mention loop.
//!
//! [`Supervisor::run`] repeats an [`Iteration`] until its cancellation token
//! fires or an optional iteration cap is reached. Every failure is logged,
//! recorded in the [`TelemetryCollector`] and followed by the failure delay of
//! the [`BackoffPolicy`]; nothing short of cancellation ends the loop.
//!
//! A running iteration is never dropped. It receives the token and decides
//! where it can stop: [`MentionLoop`] abandons a wait for mentions but answers
//! every mention it has already taken.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::config::SupervisorConfig;
use crate::coral::{CoralSession, Mention};
use crate::error::Result;
use crate::prompt::mention_input;
use crate::telemetry::TelemetryCollector;

/// Reply sent to a requester whose mention could not be answered.
pub const ERROR_REPLY: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

pub trait BackoffPolicy: Send + Sync {
    fn delay(&self, outcome: Outcome) -> Duration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub success: Duration,
    pub failure: Duration,
}

impl FixedBackoff {
    pub fn from_config(cfg: &SupervisorConfig) -> Self {
        Self {
            success: Duration::from_millis(cfg.success_delay_ms),
            failure: Duration::from_millis(cfg.failure_delay_ms),
        }
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

impl BackoffPolicy for FixedBackoff {
    fn delay(&self, outcome: Outcome) -> Duration {
        match outcome {
            Outcome::Success => self.success,
            Outcome::Failure => self.failure,
        }
    }
}

/// One unit of supervised work.
#[async_trait]
pub trait Iteration: Send + Sync {
    async fn run_once(&self, cancel: &CancellationToken) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    pub iterations: u64,
    pub failures: u64,
}

pub struct Supervisor {
    iteration: Arc<dyn Iteration>,
    backoff: Box<dyn BackoffPolicy>,
    max_iterations: Option<u64>,
    telemetry: TelemetryCollector,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(iteration: Arc<dyn Iteration>, backoff: impl BackoffPolicy + 'static) -> Self {
        Self {
            iteration,
            backoff: Box::new(backoff),
            max_iterations: None,
            telemetry: TelemetryCollector::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(iteration: Arc<dyn Iteration>, cfg: &SupervisorConfig) -> Self {
        Self::new(iteration, FixedBackoff::from_config(cfg))
            .with_max_iterations(cfg.max_iterations)
            .with_telemetry(TelemetryCollector::with_capacity(cfg.telemetry_capacity))
    }

    pub fn with_max_iterations(mut self, max: Option<u64>) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    pub async fn run(&self) -> SupervisorReport {
        let mut report = SupervisorReport::default();

        while !self.cancel.is_cancelled() {
            if self.max_iterations.is_some_and(|max| report.iterations >= max) {
                break;
            }

            let result = self.iteration.run_once(&self.cancel).await;
            report.iterations += 1;

            let outcome = match result {
                Ok(()) => Outcome::Success,
                Err(err) => {
                    report.failures += 1;
                    tracing::error!(
                        error = %err,
                        iteration = report.iterations,
                        "iteration failed"
                    );
                    self.telemetry
                        .record_failure("mention_loop", err.to_string(), report.iterations);
                    Outcome::Failure
                }
            };

            if self.max_iterations.is_some_and(|max| report.iterations >= max) {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.backoff.delay(outcome)) => {}
            }
        }

        self.telemetry.record(
            "supervisor_stopped",
            json!({ "iterations": report.iterations, "failures": report.failures }),
        );
        tracing::info!(
            iterations = report.iterations,
            failures = report.failures,
            "supervisor stopped"
        );
        report
    }
}

/// Produces the reply text for one mention.
#[async_trait]
pub trait MentionResponder: Send + Sync {
    async fn respond(&self, mention: &Mention) -> Result<String>;
}

/// Answers each mention with a fresh agent conversation.
pub struct AgentResponder {
    agent: Mutex<Agent>,
}

impl AgentResponder {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent: Mutex::new(agent),
        }
    }
}

#[async_trait]
impl MentionResponder for AgentResponder {
    async fn respond(&self, mention: &Mention) -> Result<String> {
        let mut agent = self.agent.lock().await;
        agent.reset();
        agent.respond(mention_input(mention)).await
    }
}

/// Wait for mentions, answer each one in its thread.
pub struct MentionLoop {
    session: CoralSession,
    responder: Arc<dyn MentionResponder>,
}

impl MentionLoop {
    pub fn new(session: CoralSession, responder: Arc<dyn MentionResponder>) -> Self {
        Self { session, responder }
    }

    async fn handle(&self, mention: &Mention) -> Result<()> {
        tracing::info!(
            thread_id = %mention.thread_id,
            sender = %mention.sender_id,
            "handling mention"
        );
        match self.responder.respond(mention).await {
            Ok(answer) => {
                self.session
                    .send_message(&mention.thread_id, &mention.sender_id, &answer)
                    .await
            }
            Err(err) => {
                if let Err(send_err) = self
                    .session
                    .send_message(&mention.thread_id, &mention.sender_id, ERROR_REPLY)
                    .await
                {
                    tracing::warn!(error = %send_err, "failed to deliver error reply");
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Iteration for MentionLoop {
    /// Every mention in the batch is handled, even after `cancel` fires; the
    /// first failure is returned.
    async fn run_once(&self, cancel: &CancellationToken) -> Result<()> {
        let mentions = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("mention wait cancelled");
                return Ok(());
            }
            mentions = self.session.wait_for_mentions() => mentions?,
        };
        if mentions.is_empty() {
            tracing::debug!("no mentions");
            return Ok(());
        }

        let mut first_error = None;
        for mention in &mentions {
            if let Err(err) = self.handle(mention).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForensicError;
    use crate::mcp::tests::ScriptedTransport;
    use crate::mcp::{
        JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpClient, McpTransport,
    };
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counting {
        runs: AtomicU64,
        fail_every: u64,
    }

    #[async_trait]
    impl Iteration for Counting {
        async fn run_once(&self, _cancel: &CancellationToken) -> Result<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && run % self.fail_every == 0 {
                return Err(ForensicError::Protocol(format!("run {run} failed")));
            }
            Ok(())
        }
    }

    fn quick() -> FixedBackoff {
        FixedBackoff {
            success: Duration::from_millis(1),
            failure: Duration::from_millis(1),
        }
    }

    #[test]
    fn default_backoff_matches_config() {
        let backoff = FixedBackoff::default();
        assert_eq!(backoff.delay(Outcome::Success), Duration::from_secs(1));
        assert_eq!(backoff.delay(Outcome::Failure), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stops_after_max_iterations_and_survives_failures() {
        let iteration = Arc::new(Counting {
            runs: AtomicU64::new(0),
            fail_every: 2,
        });
        let supervisor = Supervisor::new(iteration.clone(), quick()).with_max_iterations(Some(5));

        let report = supervisor.run().await;
        assert_eq!(report, SupervisorReport { iterations: 5, failures: 2 });
        assert_eq!(iteration.runs.load(Ordering::SeqCst), 5);

        let (events, failures) = supervisor.telemetry().drain();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].attempt, 2);
        assert_eq!(events.last().unwrap().kind, "supervisor_stopped");
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff() {
        let iteration = Arc::new(Counting {
            runs: AtomicU64::new(0),
            fail_every: 0,
        });
        let backoff = FixedBackoff {
            success: Duration::from_secs(3600),
            failure: Duration::from_secs(3600),
        };
        let supervisor = Supervisor::new(iteration, backoff);
        let token = supervisor.cancellation_token();

        let handle = tokio::spawn(async move { supervisor.run().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor should stop promptly")
            .unwrap();
        assert_eq!(report.iterations, 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let iteration = Arc::new(Counting {
            runs: AtomicU64::new(0),
            fail_every: 0,
        });
        let token = CancellationToken::new();
        token.cancel();
        let report = Supervisor::new(iteration, quick())
            .with_cancellation(token)
            .run()
            .await;
        assert_eq!(report.iterations, 0);
    }

    struct Scripted(std::result::Result<String, String>);

    #[async_trait]
    impl MentionResponder for Scripted {
        async fn respond(&self, _mention: &Mention) -> Result<String> {
            self.0.clone().map_err(ForensicError::LanguageModel)
        }
    }

    fn mention_batch() -> serde_json::Value {
        let envelope = json!({"messages": [{
            "threadId": "t1",
            "senderId": "interface_agent",
            "content": "check https://x/y.jpg"
        }]});
        json!({"content": [{"type": "text", "text": envelope.to_string()}]})
    }

    async fn mention_loop(
        transport: Arc<dyn McpTransport>,
        responder: impl MentionResponder + 'static,
    ) -> MentionLoop {
        let client = McpClient::connect(transport).await.unwrap();
        let session = CoralSession::new(Arc::new(client), 30_000);
        MentionLoop::new(session, Arc::new(responder))
    }

    #[tokio::test]
    async fn answers_in_the_mention_thread() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .initialized()
                .reply("tools/call", mention_batch())
                .reply("tools/call", json!({"content": []})),
        );
        let looped = mention_loop(transport.clone(), Scripted(Ok("Likely fake".into()))).await;

        looped.run_once(&CancellationToken::new()).await.unwrap();

        let reply = &transport.tool_calls()[1];
        assert_eq!(reply["name"], "send_message");
        assert_eq!(reply["arguments"]["threadId"], "t1");
        assert_eq!(reply["arguments"]["content"], "Likely fake");
        assert_eq!(reply["arguments"]["mentions"][0], "interface_agent");
    }

    #[tokio::test]
    async fn responder_failure_sends_error_reply_and_propagates() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .initialized()
                .reply("tools/call", mention_batch())
                .reply("tools/call", json!({"content": []})),
        );
        let looped = mention_loop(transport.clone(), Scripted(Err("model down".into()))).await;

        let err = looped.run_once(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ForensicError::LanguageModel(msg) if msg == "model down"));
        assert_eq!(transport.tool_calls()[1]["arguments"]["content"], ERROR_REPLY);
    }

    #[tokio::test]
    async fn idle_poll_is_a_success() {
        let transport = Arc::new(ScriptedTransport::default().initialized().reply(
            "tools/call",
            json!({"content": [{"type": "text", "text": "No new messages"}]}),
        ));
        let looped = mention_loop(transport.clone(), Scripted(Ok("unused".into()))).await;

        looped.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(transport.tool_calls().len(), 1);
    }

    #[tokio::test]
    async fn telemetry_keeps_only_the_latest_failures() {
        let iteration = Arc::new(Counting {
            runs: AtomicU64::new(0),
            fail_every: 1,
        });
        let cfg = SupervisorConfig {
            success_delay_ms: 1,
            failure_delay_ms: 1,
            max_iterations: Some(10),
            telemetry_capacity: 3,
            ..SupervisorConfig::default()
        };
        let supervisor = Supervisor::from_config(iteration, &cfg);

        let report = supervisor.run().await;
        assert_eq!(report.failures, 10);

        let (_, failures) = supervisor.telemetry().drain();
        let attempts: Vec<u64> = failures.iter().map(|f| f.attempt).collect();
        assert_eq!(attempts, vec![8, 9, 10]);
    }

    /// Cancels the supervisor while an answer is being produced.
    struct CancelsWhileAnswering(CancellationToken);

    #[async_trait]
    impl MentionResponder for CancelsWhileAnswering {
        async fn respond(&self, _mention: &Mention) -> Result<String> {
            self.0.cancel();
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok("Likely fake".into())
        }
    }

    #[tokio::test]
    async fn cancellation_lets_the_current_reply_go_out() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .initialized()
                .reply("tools/call", mention_batch())
                .reply("tools/call", json!({"content": []})),
        );
        let token = CancellationToken::new();
        let looped = mention_loop(transport.clone(), CancelsWhileAnswering(token.clone())).await;

        let report = Supervisor::new(Arc::new(looped), quick())
            .with_cancellation(token)
            .run()
            .await;

        assert_eq!(report, SupervisorReport { iterations: 1, failures: 0 });
        let reply = &transport.tool_calls()[1];
        assert_eq!(reply["name"], "send_message");
        assert_eq!(reply["arguments"]["content"], "Likely fake");
    }

    /// Handshakes normally, then never answers a tool call.
    struct Stalled(ScriptedTransport);

    #[async_trait]
    impl McpTransport for Stalled {
        async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            if request.method == "tools/call" {
                std::future::pending::<()>().await;
            }
            self.0.send(request).await
        }

        async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
            self.0.notify(notification).await
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_mention_wait() {
        let transport = Arc::new(Stalled(ScriptedTransport::default().initialized()));
        let looped = mention_loop(transport, Scripted(Ok("unused".into()))).await;
        let token = CancellationToken::new();

        let waiting = {
            let token = token.clone();
            tokio::spawn(async move { looped.run_once(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .expect("wait should end on cancellation")
            .unwrap()
            .unwrap();
    }
}
