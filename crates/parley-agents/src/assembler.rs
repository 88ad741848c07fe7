//! Output assembly.
//!
//! Converts a supervisor run transcript into a stable user-facing
//! reply. Internal plumbing (tool messages, handoff-back markers,
//! transfer-back tool calls) never leaks to the user.
//!
//! Priority: the last non-empty supervisor message, then the last
//! non-empty non-internal assistant message, otherwise empty (the
//! worker applies the `"Done."` fallback).

use tracing::debug;

use crate::transcript::{AgentMessage, SUPERVISOR_NAME};

/// Whether a message is internal routing plumbing.
fn is_handoff_or_internal(msg: &AgentMessage) -> bool {
    if msg.is_internal() {
        return true;
    }
    // Transfer-back calls appear as assistant tool calls.
    if let Some(calls) = &msg.tool_calls {
        if calls
            .iter()
            .any(|c| c.function.name.trim() == "transfer_back_to_supervisor")
        {
            return true;
        }
    }
    false
}

fn content_of(msg: &AgentMessage) -> &str {
    msg.content.trim()
}

/// The last non-empty supervisor-authored answer.
fn pick_last_supervisor_answer(messages: &[AgentMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .filter(|m| !is_handoff_or_internal(m))
        .find(|m| m.role == "assistant" && m.name.as_deref() == Some(SUPERVISOR_NAME))
        .map(content_of)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Fallback: the last non-empty non-internal assistant answer.
fn pick_last_non_internal_answer(messages: &[AgentMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .filter(|m| !is_handoff_or_internal(m))
        .filter(|m| m.role == "assistant")
        .map(content_of)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

/// Extract the user-facing reply text from a run transcript.
///
/// Returns an empty string when nothing user-facing was produced; the
/// caller decides the fallback.
pub fn extract_reply_text(messages: &[AgentMessage]) -> String {
    if let Some(answer) = pick_last_supervisor_answer(messages) {
        debug!(source = "supervisor", "reply selected");
        return answer;
    }
    if let Some(answer) = pick_last_non_internal_answer(messages) {
        debug!(source = "fallback_last_assistant", "reply selected");
        return answer;
    }
    debug!(reason = "no_user_facing_message_found", "reply empty");
    String::new()
}
