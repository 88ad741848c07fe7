//! Per-request tool context and grounding tracking.
//!
//! Memory is persisted only when a request was grounded in real tool
//! calls. Each message-processing task creates one [`GroundingTracker`]
//! and threads it through the supervisor run inside a [`ToolContext`];
//! because the tracker is a shared handle, events recorded from spawned
//! sub-tasks stay visible to the worker that owns the request.

use std::sync::{Arc, Mutex};

/// One recorded tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolEvent {
    pub name: String,
    pub ok: bool,
}

/// Shared per-request collector of tool executions.
#[derive(Debug, Clone, Default)]
pub struct GroundingTracker {
    events: Arc<Mutex<Vec<ToolEvent>>>,
}

impl GroundingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one tool execution.
    pub fn record(&self, name: &str, ok: bool) {
        let mut events = self.events.lock().expect("grounding tracker poisoned");
        events.push(ToolEvent {
            name: name.to_string(),
            ok,
        });
    }

    /// Record a tool execution with ok/fail inferred from the result.
    pub fn record_result(&self, name: &str, result: &serde_json::Value) {
        self.record(name, !result_is_error_like(result));
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<ToolEvent> {
        self.events.lock().expect("grounding tracker poisoned").clone()
    }

    /// True when at least one non-internal tool executed successfully.
    ///
    /// Local audio helpers are plumbing and do not count unless
    /// `count_local_audio` is set.
    pub fn any_grounded_success(&self, count_local_audio: bool) -> bool {
        self.events().iter().any(|ev| {
            ev.ok
                && !is_internal_tool_name(&ev.name)
                && (count_local_audio || !ev.name.starts_with("local_audio_"))
        })
    }
}

/// Per-request context handed to every tool execution.
///
/// Carries the identities the supervisor run was configured with (for
/// memory reads and tracing) plus the grounding tracker.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub user_id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub source: String,
    /// The stream store's entry id, for correlation in logs.
    pub stream_message_id: String,
    pub grounding: GroundingTracker,
}

impl ToolContext {
    /// A context for one inbound message.
    pub fn for_message(
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        source: impl Into<String>,
        stream_message_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            source: source.into(),
            stream_message_id: stream_message_id.into(),
            grounding: GroundingTracker::new(),
        }
    }
}

const INTERNAL_TOOL_PREFIXES: &[&str] = &["transfer_to_"];

const INTERNAL_TOOL_NAMES: &[&str] = &[
    "transfer_back_to_supervisor",
    "memory_get_context",
    "get_current_datetime",
];

/// Whether a tool is internal plumbing, excluded from grounding.
pub fn is_internal_tool_name(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return true;
    }
    INTERNAL_TOOL_NAMES.contains(&name)
        || INTERNAL_TOOL_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Best-effort check for tool failures.
///
/// Error-like shapes: the hardening layer's stable error payloads
/// (`error_type`), provider error objects (`object == "error"` or an
/// `error` key), and HTTP-ish statuses >= 400. A JSON string payload is
/// inspected the same way; a plain non-JSON string counts as success.
pub fn result_is_error_like(result: &serde_json::Value) -> bool {
    match result {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return true;
            }
            match serde_json::from_str::<serde_json::Value>(s) {
                Ok(inner) if inner.is_object() => object_is_error_like(&inner),
                _ => false,
            }
        }
        v if v.is_object() => object_is_error_like(v),
        _ => false,
    }
}

fn object_is_error_like(obj: &serde_json::Value) -> bool {
    if obj.get("error_type").is_some_and(|v| !v.is_null()) {
        return true;
    }
    if obj.get("object").and_then(|v| v.as_str()) == Some("error") {
        return true;
    }
    if obj.get("error").is_some_and(|v| !v.is_null()) {
        return true;
    }
    let status = obj
        .get("status")
        .or_else(|| obj.get("status_code"))
        .and_then(|v| v.as_i64());
    matches!(status, Some(code) if code >= 400)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn internal_names() {
        assert!(is_internal_tool_name("transfer_to_notes_pages"));
        assert!(is_internal_tool_name("transfer_back_to_supervisor"));
        assert!(is_internal_tool_name("memory_get_context"));
        assert!(is_internal_tool_name("get_current_datetime"));
        assert!(is_internal_tool_name(""));
        assert!(is_internal_tool_name("  "));
        assert!(!is_internal_tool_name("notes_create_page"));
        assert!(!is_internal_tool_name("local_audio_text_to_speech"));
    }

    #[test]
    fn error_like_detection() {
        assert!(result_is_error_like(&json!(null)));
        assert!(result_is_error_like(&json!("")));
        assert!(result_is_error_like(&json!({"error_type": "validation_error"})));
        assert!(result_is_error_like(&json!({"object": "error"})));
        assert!(result_is_error_like(&json!({"error": "boom"})));
        assert!(result_is_error_like(&json!({"status": 400})));
        assert!(result_is_error_like(&json!({"status_code": 503})));

        assert!(!result_is_error_like(&json!({"status": 200})));
        assert!(!result_is_error_like(&json!({"results": []})));
        assert!(!result_is_error_like(&json!("plain text result")));
        assert!(!result_is_error_like(&json!(42)));
    }

    #[test]
    fn error_like_inspects_json_strings() {
        let payload = json!({"error_type": "validation_error"}).to_string();
        assert!(result_is_error_like(&json!(payload)));
        assert!(!result_is_error_like(&json!(r#"{"ok": true}"#)));
    }

    #[test]
    fn grounding_requires_non_internal_success() {
        let tracker = GroundingTracker::new();
        assert!(!tracker.any_grounded_success(false));

        tracker.record("memory_get_context", true);
        tracker.record("transfer_to_notes_pages", true);
        tracker.record("notes_create_page", false);
        assert!(!tracker.any_grounded_success(false));

        tracker.record("notes_create_page", true);
        assert!(tracker.any_grounded_success(false));
    }

    #[test]
    fn local_audio_counts_only_when_opted_in() {
        let tracker = GroundingTracker::new();
        tracker.record("local_audio_text_to_speech", true);
        assert!(!tracker.any_grounded_success(false));
        assert!(tracker.any_grounded_success(true));
    }

    #[test]
    fn tracker_is_shared_across_clones() {
        let tracker = GroundingTracker::new();
        let clone = tracker.clone();
        clone.record("notes_search", true);
        assert_eq!(tracker.events().len(), 1);
        assert!(tracker.any_grounded_success(false));
    }

    #[test]
    fn record_result_infers_ok() {
        let tracker = GroundingTracker::new();
        tracker.record_result("notes_search", &json!({"results": []}));
        tracker.record_result("notes_search", &json!({"error": "denied"}));
        let events = tracker.events();
        assert!(events[0].ok);
        assert!(!events[1].ok);
    }
}
