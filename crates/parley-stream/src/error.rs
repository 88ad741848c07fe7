//! Error types for the stream layer.

use thiserror::Error;

/// Errors from the stream / KV stores.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Underlying Redis failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An envelope could not be decoded from a stream entry.
    #[error("envelope error: {0}")]
    Envelope(#[from] parley_types::EnvelopeError),

    /// JSON serialization of a structured field failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamError>;
