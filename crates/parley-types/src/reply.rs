//! Structured reply contract for supervisor output.
//!
//! The supervisor's final output is machine-parseable so the runtime never
//! has to scrape routing chatter out of free text. `reply_text` must always
//! be safe to send directly to the user.

use serde::{Deserialize, Serialize};

/// Whether a request succeeded, as reported by the supervisor and echoed
/// on the outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Success,
    Error,
}

impl ReplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStatus::Success => "success",
            ReplyStatus::Error => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReplyStatus::Success)
    }
}

impl Default for ReplyStatus {
    fn default() -> Self {
        ReplyStatus::Success
    }
}

/// Final user-facing reply emitted by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStructuredReply {
    /// User-facing reply text; never empty.
    pub reply_text: String,

    /// Whether the request succeeded.
    #[serde(default)]
    pub status: ReplyStatus,

    /// Actions performed during the run (for observability).
    #[serde(default)]
    pub actions: Vec<String>,

    /// Short user-safe error message when `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Local path of a synthesized audio reply, when one was generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_file_path: Option<String>,

    /// Audio format for `tts_file_path` (e.g. `mp3`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_format: Option<String>,
}

impl SupervisorStructuredReply {
    /// A success reply with just text.
    pub fn text(reply_text: impl Into<String>) -> Self {
        Self {
            reply_text: reply_text.into(),
            status: ReplyStatus::Success,
            actions: Vec::new(),
            error_message: None,
            tts_file_path: None,
            tts_format: None,
        }
    }

    /// An error reply with a user-safe message.
    pub fn error(reply_text: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            reply_text: reply_text.into(),
            status: ReplyStatus::Error,
            actions: Vec::new(),
            error_message: Some(error_message.into()),
            tts_file_path: None,
            tts_format: None,
        }
    }

    /// JSON Schema for structured-output requests.
    pub fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "reply_text": {
                    "type": "string",
                    "minLength": 1,
                    "description": "User-facing reply text."
                },
                "status": {
                    "type": "string",
                    "enum": ["success", "error"],
                    "description": "Whether the request succeeded."
                },
                "actions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Actions performed, for observability."
                },
                "error_message": {
                    "type": ["string", "null"],
                    "description": "Short user-safe error message when status=error."
                },
                "tts_file_path": {
                    "type": ["string", "null"],
                    "description": "Local path of a synthesized audio reply."
                },
                "tts_format": {
                    "type": ["string", "null"],
                    "description": "Audio format for tts_file_path (e.g. mp3)."
                }
            },
            "required": ["reply_text", "status"]
        })
    }
}
