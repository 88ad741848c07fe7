//! Error types for the tool-server client.

use thiserror::Error;

/// Errors from config loading, transports, and RPC calls.
#[derive(Debug, Error)]
pub enum McpError {
    /// The config file is missing or malformed.
    #[error("invalid tool-server config: {0}")]
    Config(String),

    /// A `${VAR}` placeholder referenced an unset environment variable.
    /// This is a startup error by design.
    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    /// Transport-level failure (process spawn, pipe, HTTP).
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, McpError>;
