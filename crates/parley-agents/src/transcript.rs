//! Run transcript.
//!
//! The supervisor run produces an ordered transcript of
//! [`AgentMessage`]s: supervisor turns, tool results, agent answers,
//! and handoff plumbing. The transcript is what the output assembler
//! inspects; the wire view sent to the LLM is derived from it.

use parley_llm::types::{ChatMessage, ToolCall};

/// Name assigned to supervisor-authored assistant messages.
pub const SUPERVISOR_NAME: &str = "supervisor";

/// One transcript message.
#[derive(Debug, Clone)]
pub struct AgentMessage {
    /// "assistant", "tool", or "user".
    pub role: String,
    /// Author name for assistant messages ("supervisor" or an agent
    /// name).
    pub name: Option<String>,
    pub content: String,
    /// Tool calls requested in this assistant message.
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For tool messages: the call they answer.
    pub tool_call_id: Option<String>,
    /// Marks internal handoff-return plumbing; never user-facing.
    pub is_handoff_back: bool,
}

impl AgentMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            name: None,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            is_handoff_back: false,
        }
    }

    /// An assistant message authored by the supervisor.
    pub fn supervisor(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            name: Some(SUPERVISOR_NAME.into()),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            is_handoff_back: false,
        }
    }

    /// An assistant message carrying tool calls.
    pub fn assistant_with_calls(
        name: impl Into<String>,
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            role: "assistant".into(),
            name: Some(name.into()),
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            is_handoff_back: false,
        }
    }

    /// An assistant message authored by a named agent.
    pub fn agent(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            name: Some(name.into()),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            is_handoff_back: false,
        }
    }

    /// A tool-result message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            name: None,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            is_handoff_back: false,
        }
    }

    /// The handoff-return marker message.
    pub fn handoff_back(agent_name: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            name: Some(agent_name.into()),
            content: "Transferring back to supervisor".into(),
            tool_calls: None,
            tool_call_id: None,
            is_handoff_back: true,
        }
    }

    /// Whether this is internal plumbing the user must never see:
    /// tool messages and handoff-back markers.
    pub fn is_internal(&self) -> bool {
        self.role == "tool" || self.is_handoff_back
    }

    /// Wire view for the LLM.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.clone(),
            content: self.content.clone(),
            tool_call_id: self.tool_call_id.clone(),
            tool_calls: self.tool_calls.clone(),
        }
    }
}

/// Convert a transcript slice into wire messages.
pub fn to_chat_messages(messages: &[AgentMessage]) -> Vec<ChatMessage> {
    messages.iter().map(AgentMessage::to_chat_message).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_detection() {
        assert!(AgentMessage::tool("c1", "result").is_internal());
        assert!(AgentMessage::handoff_back("notes_pages").is_internal());
        assert!(!AgentMessage::supervisor("hi").is_internal());
        assert!(!AgentMessage::agent("notes_pages", "done").is_internal());
    }

    #[test]
    fn wire_view_preserves_tool_linkage() {
        let msg = AgentMessage::tool("call_3", "{}");
        let wire = msg.to_chat_message();
        assert_eq!(wire.role, "tool");
        assert_eq!(wire.tool_call_id.as_deref(), Some("call_3"));
    }

    #[test]
    fn supervisor_message_is_named() {
        let msg = AgentMessage::supervisor("routing");
        assert_eq!(msg.name.as_deref(), Some(SUPERVISOR_NAME));
        assert_eq!(msg.role, "assistant");
    }
}
