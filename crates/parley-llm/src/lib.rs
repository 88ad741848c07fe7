//! LLM provider layer for parley.
//!
//! Exposes the [`Provider`] trait, an OpenAI-compatible implementation
//! ([`OpenAiCompatProvider`]), the chat request/response types, and a
//! structured-output helper that forces a JSON-schema response format and
//! parses the result into a typed value.

pub mod error;
pub mod openai_compat;
pub mod provider;
pub mod structured;
pub mod types;

pub use error::{ProviderError, Result};
pub use openai_compat::{OpenAiCompatProvider, ProviderConfig};
pub use provider::Provider;
pub use structured::complete_structured;
pub use types::{ChatMessage, ChatRequest, ChatResponse, Choice, FunctionCall, ToolCall, Usage};
