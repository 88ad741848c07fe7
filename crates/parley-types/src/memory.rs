//! Memory documents.
//!
//! Memory lives in the KV store as schema-versioned JSON documents:
//! a per-user profile, a per-conversation state, and a bounded,
//! newest-first list of per-user events. Writes are worker-driven and
//! deterministic; the LLM only ever reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema tag for user profile documents.
pub const USER_PROFILE_SCHEMA: &str = "user_profile_v1";

/// Schema tag for conversation state documents.
pub const CONVERSATION_STATE_SCHEMA: &str = "conversation_state_v1";

/// Schema tag for user event documents.
pub const MEMORY_EVENT_SCHEMA: &str = "memory_event_v1";

/// Default bound on the per-user event list.
pub const DEFAULT_EVENTS_MAX_ITEMS: usize = 15;

/// Clamp an event-list bound into the supported range.
pub fn clamp_events_max_items(n: usize) -> usize {
    n.clamp(1, 200)
}

/// The snapshot returned by a single pipelined memory read.
///
/// Documents are kept as loose JSON: their shapes evolve by schema tag,
/// and readers only project the fields they need.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryContext {
    pub user_profile: Option<serde_json::Value>,
    pub conversation_state: Option<serde_json::Value>,
    #[serde(default)]
    pub recent_events: Vec<serde_json::Value>,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.user_profile.is_none()
            && self.conversation_state.is_none()
            && self.recent_events.is_empty()
    }
}

/// One entry in the per-user event history.
///
/// Appended only after a grounded success, so the history answers
/// questions like "what did I ask you to save yesterday?".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub schema: String,
    pub event_id: String,
    pub ts: DateTime<Utc>,
    pub user_id: String,
    pub conversation_id: String,
    pub original_text: String,
    pub english_text: String,
    pub reply_text: String,
    pub detected_language: Option<String>,
    pub inbound_has_audio: bool,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_audio_url: Option<String>,
}

impl MemoryEvent {
    /// Start a new event with fresh id and timestamp.
    pub fn new(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            schema: MEMORY_EVENT_SCHEMA.into(),
            event_id: uuid::Uuid::new_v4().to_string(),
            ts: Utc::now(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            original_text: String::new(),
            english_text: String::new(),
            reply_text: String::new(),
            detected_language: None,
            inbound_has_audio: false,
            actions: Vec::new(),
            task_instructions: None,
            reply_audio_url: None,
        }
    }
}

/// Truncate a string to `limit` characters, eliding with `...`.
///
/// Used wherever memory documents and prompt snapshots must stay small.
pub fn truncate(s: &str, limit: usize) -> String {
    let s = s.trim();
    if limit == 0 || s.chars().count() <= limit {
        return s.to_string();
    }
    let keep = limit.saturating_sub(3);
    let cut: String = s.chars().take(keep).collect();
    format!("{cut}...")
}
