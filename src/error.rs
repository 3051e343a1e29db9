use thiserror::Error;

use crate::forensics::AnalysisError;

pub type Result<T> = std::result::Result<T, ForensicError>;

#[derive(Debug, Error)]
pub enum ForensicError {
    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    /// The MCP connection went away. `request_sent` tells whether the server
    /// may already have seen the request.
    #[error("MCP connection closed: {reason}")]
    ConnectionClosed { reason: String, request_sent: bool },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForensicError {
    /// Walks `ToolInvocation` wrappers down to the image analysis failure, if any.
    pub fn analysis(&self) -> Option<&AnalysisError> {
        match self {
            ForensicError::Analysis(err) => Some(err),
            ForensicError::ToolInvocation { source, .. } => source
                .downcast_ref::<ForensicError>()
                .and_then(ForensicError::analysis)
                .or_else(|| source.downcast_ref::<AnalysisError>()),
            _ => None,
        }
    }
}
