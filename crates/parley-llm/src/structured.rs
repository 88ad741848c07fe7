//! Structured output helper.
//!
//! Forces a JSON-schema response format, parses the reply into a typed
//! value, and on a parse failure feeds the error back to the model for
//! exactly one repair attempt.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::types::{ChatMessage, ChatRequest};

/// Run a chat completion constrained to `schema` and parse the reply as
/// `T`.
///
/// `schema_name` labels the response format; `messages` is the full
/// conversation to send. One repair round-trip is attempted when the
/// first reply fails to parse.
pub async fn complete_structured<T: DeserializeOwned>(
    provider: &dyn Provider,
    model: &str,
    messages: Vec<ChatMessage>,
    schema_name: &str,
    schema: serde_json::Value,
) -> Result<T> {
    let request =
        ChatRequest::new(model, messages.clone()).with_json_schema(schema_name, schema.clone());
    let response = provider.complete(&request).await?;
    let content = response
        .message()
        .map(|m| m.content.clone())
        .unwrap_or_default();

    match parse_json_content::<T>(&content) {
        Ok(value) => Ok(value),
        Err(parse_err) => {
            warn!(
                schema = schema_name,
                error = %parse_err,
                "structured output parse failed, retrying once"
            );

            let mut retry_messages = messages;
            retry_messages.push(ChatMessage::assistant(content));
            retry_messages.push(ChatMessage::user(format!(
                "Your previous reply was not valid JSON for the required schema \
                 ({parse_err}). Reply again with ONLY a JSON object matching the schema."
            )));

            let retry =
                ChatRequest::new(model, retry_messages).with_json_schema(schema_name, schema);
            let response = provider.complete(&retry).await?;
            let content = response
                .message()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            parse_json_content::<T>(&content)
                .map_err(|e| ProviderError::StructuredOutput(e.to_string()))
        }
    }
}

/// Parse model output as JSON, tolerating a fenced code block wrapper.
fn parse_json_content<T: DeserializeOwned>(content: &str) -> serde_json::Result<T> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);
    serde_json::from_str(stripped)
}
