//! Supervisor-level utility tools.
//!
//! These are orchestration helpers, not agent capabilities: a UTC clock
//! and a read-only view of the KV memory. Both are internal for
//! grounding purposes. Memory writes stay deterministic in the worker;
//! the LLM only reads.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::debug;

use parley_stream::Memory;
use parley_tools::{Tool, ToolContext, ToolError};
use parley_types::memory::truncate;

/// Field cap applied to memory events echoed into the prompt.
const EVENT_FIELD_LIMIT: usize = 600;

/// Current date and time in ISO 8601 (UTC).
///
/// The supervisor calls this before answering anything time-sensitive
/// ("today", "now", "current").
pub struct GetCurrentDatetimeTool;

#[async_trait]
impl Tool for GetCurrentDatetimeTool {
    fn name(&self) -> &str {
        "get_current_datetime"
    }

    fn description(&self) -> &str {
        "Returns the current date and time in ISO 8601 format (UTC). \
         Use whenever the request involves time-sensitive information."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({ "type": "object", "properties": {} }))
    }

    fn source_server(&self) -> &str {
        "supervisor"
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let now = Utc::now().to_rfc3339();
        debug!(now = %now, "get_current_datetime");
        Ok(Value::String(now))
    }
}

/// Fetch the KV-backed memory context for the current user and
/// conversation.
pub struct MemoryGetContextTool {
    memory: Arc<dyn Memory>,
}

impl MemoryGetContextTool {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryGetContextTool {
    fn name(&self) -> &str {
        "memory_get_context"
    }

    fn description(&self) -> &str {
        "Fetch memory context for the current user and conversation: \
         user_profile, conversation_state, and recent_events."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({ "type": "object", "properties": {} }))
    }

    fn source_server(&self) -> &str {
        "supervisor"
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let user_id = ctx.user_id.trim();
        let conversation_id = ctx.conversation_id.trim();
        if user_id.is_empty() || conversation_id.is_empty() {
            debug!("memory_get_context: missing identifiers");
            return Ok(json!({ "user_profile": null, "conversation_state": null }));
        }

        let context = self
            .memory
            .get_context(user_id, conversation_id)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        // Keep the payload small to avoid token blow-ups.
        let events: Vec<Value> = context
            .recent_events
            .iter()
            .map(|e| {
                json!({
                    "ts": e.get("ts"),
                    "conversation_id": e.get("conversation_id"),
                    "original_text": truncate(str_field(e, "original_text"), EVENT_FIELD_LIMIT),
                    "english_text": truncate(str_field(e, "english_text"), EVENT_FIELD_LIMIT),
                    "reply_text": truncate(str_field(e, "reply_text"), EVENT_FIELD_LIMIT),
                    "actions": e.get("actions").cloned().unwrap_or_else(|| json!([])),
                })
            })
            .collect();

        Ok(json!({
            "user_profile": context.user_profile,
            "conversation_state": context.conversation_state,
            "recent_events": events,
        }))
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}
