//! A fact-checking agent for the Coral multi-agent server.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with OpenAI and Mistral clients.
//! - A tool interface (`Tool` and `ToolRegistry`) and an `Agent` that loops
//!   between the model and its tools.
//! - `ImageForensicsTool`, which describes an image and judges how likely it
//!   is to be a deepfake.
//! - An MCP client, a Coral session and a `Supervisor` that keeps the mention
//!   loop alive.

mod agent;
mod config;
mod error;
mod llm;
mod memory;
mod message;
mod tool;

pub mod coral;
pub mod forensics;
pub mod mcp;
pub mod prompt;
pub mod supervisor;
pub mod telemetry;
pub mod tools;

pub use agent::Agent;
pub use config::{
    AppConfig, ClassifierDevice, CoralConfig, CoralTransportKind, ForensicsConfig, LogFormat,
    LoggingConfig, ModelConfig, SearchConfig, SupervisorConfig,
};
pub use coral::{CoralSession, Mention};
pub use error::{ForensicError, Result};
pub use forensics::{AnalysisError, AnalysisResult, ImageForensicsTool, Judgement};
pub use llm::{
    model_from_config, LanguageModel, MistralClient, ModelCompletion, OpenAIClient, StubModel,
};
pub use memory::ConversationMemory;
pub use message::{Attachment, AttachmentKind, Message, Role, ToolCall, ToolResult};
pub use supervisor::{AgentResponder, MentionLoop, Supervisor, SupervisorReport};
pub use telemetry::{init_tracing, TelemetryCollector};
pub use tool::{Tool, ToolDescription, ToolRegistry};
