//! Error types for the runtime.

use thiserror::Error;

/// Errors from the worker, dispatcher, and bootstrap.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("stream error: {0}")]
    Stream(#[from] parley_stream::StreamError),

    #[error("agent error: {0}")]
    Agent(#[from] parley_agents::AgentError),

    #[error("tool-server error: {0}")]
    Mcp(#[from] parley_mcp::McpError),

    #[error("speech error: {0}")]
    Speech(#[from] parley_tools::SpeechError),

    #[error("channel error: {0}")]
    Channel(#[from] crate::channels::ChannelError),

    #[error("config error: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
