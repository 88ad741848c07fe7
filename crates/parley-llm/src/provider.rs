//! The core [`Provider`] trait for LLM chat completions.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse};

/// A provider that can execute chat completion requests.
///
/// Implementations handle the protocol details for a specific LLM API
/// (authentication, request formatting, response parsing). The main
/// implementation is
/// [`OpenAiCompatProvider`](crate::openai_compat::OpenAiCompatProvider),
/// which works with any OpenAI-compatible endpoint.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider name (e.g. "openai").
    fn name(&self) -> &str;

    /// Execute a chat completion request and return the response.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
