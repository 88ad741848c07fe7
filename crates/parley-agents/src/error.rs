//! Error types for the agent runtime.

use thiserror::Error;

/// Errors from composition and supervisor execution.
#[derive(Debug, Error)]
pub enum AgentError {
    /// An agent definition references a tool that does not exist.
    /// This fails agent build, never silently skips.
    #[error("agent '{agent}' references unknown tool '{tool}'")]
    UnknownTool { agent: String, tool: String },

    /// The supervisor cannot be built without agents.
    #[error("no agents available to build supervisor")]
    NoAgents,

    /// The LLM provider failed.
    #[error("provider error: {0}")]
    Provider(#[from] parley_llm::ProviderError),

    /// A tool failed in a way the hardening layer did not absorb.
    #[error("tool error: {0}")]
    Tool(#[from] parley_tools::ToolError),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentError>;
