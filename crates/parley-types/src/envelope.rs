//! Stream envelope types.
//!
//! Envelopes are flat string-valued records appended to the inbound and
//! outbound streams. Structured sub-fields (media metadata, provider ids)
//! are JSON-encoded into a single `metadata` field so that every stream
//! entry remains a `HashMap<String, String>`.
//!
//! [`InboundEnvelope`] is produced by the ingress webhook and consumed by
//! the worker. [`OutboundEnvelope`] is produced by the worker and consumed
//! by the dispatcher. [`ProcessingEnvelope`] is the worker-internal record
//! rendered into the supervisor's input message.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reply::ReplyStatus;

/// Schema tag carried by the processing envelope.
pub const INBOUND_ENVELOPE_SCHEMA: &str = "inbound_envelope_v1";

/// Prefix marking the supervisor input as a machine-readable envelope.
pub const INPUT_ENVELOPE_PREFIX: &str = "INPUT_ENVELOPE_JSON:";

/// Error type for envelope encoding/decoding.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// A required field is missing from the stream entry.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field could not be parsed (timestamp, status, JSON metadata).
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// A single media attachment reported by the messaging provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Provider-hosted media URL (fetch requires channel credentials).
    pub url: String,
    /// MIME content type (e.g. `audio/ogg`).
    pub content_type: String,
}

impl MediaItem {
    /// Whether this item is an audio attachment.
    pub fn is_audio(&self) -> bool {
        self.content_type.to_ascii_lowercase().starts_with("audio/")
    }
}

/// Provider-specific metadata carried alongside an inbound message.
///
/// Survives JSON round-trips unchanged; unknown provider fields are kept
/// in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Number of media attachments.
    #[serde(default)]
    pub num_media: usize,

    /// Ordered media attachments.
    #[serde(default)]
    pub media: Vec<MediaItem>,

    /// Any additional provider fields (message sid, etc.).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MessageMetadata {
    /// First audio attachment, if any.
    pub fn first_audio(&self) -> Option<&MediaItem> {
        self.media.iter().find(|m| m.is_audio())
    }

    /// Whether the message carries at least one audio attachment.
    pub fn has_audio(&self) -> bool {
        self.first_audio().is_some()
    }
}

/// An inbound message published by the ingress onto the inbound stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Logical message id, unique per webhook delivery.
    pub message_id: String,

    /// Channel tag (e.g. `whatsapp`).
    pub source: String,

    /// Channel-scoped user identity (e.g. `whatsapp:+14155550100`).
    pub user_id: String,

    /// Conversation identifier; defaults to `message_id` when absent.
    pub conversation_id: String,

    /// Message text; possibly empty when media is present.
    pub text: String,

    /// When the ingress accepted the message.
    pub timestamp: DateTime<Utc>,

    /// Provider metadata (media items, provider ids).
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl InboundEnvelope {
    /// Encode into the flat string map appended to the stream.
    pub fn encode(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("message_id".into(), self.message_id.clone());
        fields.insert("source".into(), self.source.clone());
        fields.insert("user_id".into(), self.user_id.clone());
        fields.insert("conversation_id".into(), self.conversation_id.clone());
        fields.insert("text".into(), self.text.clone());
        fields.insert("timestamp".into(), self.timestamp.to_rfc3339());
        fields.insert(
            "metadata".into(),
            serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".into()),
        );
        fields
    }

    /// Decode a stream entry back into an envelope.
    ///
    /// Lenient where the worker must be lenient: a missing
    /// `conversation_id` falls back to `message_id`, unparseable metadata
    /// decays to empty. A missing `message_id` is an error -- the ingress
    /// always writes one.
    pub fn decode(fields: &HashMap<String, String>) -> Result<Self, EnvelopeError> {
        let message_id = non_empty(fields, "message_id")
            .ok_or(EnvelopeError::MissingField("message_id"))?
            .to_string();
        let conversation_id = non_empty(fields, "conversation_id")
            .unwrap_or(&message_id)
            .to_string();
        let timestamp = parse_timestamp(fields.get("timestamp").map(String::as_str))?;
        let metadata = fields
            .get("metadata")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        Ok(Self {
            message_id,
            source: field_or(fields, "source", "unknown"),
            user_id: field_or(fields, "user_id", "unknown"),
            conversation_id,
            text: field_or(fields, "text", ""),
            timestamp,
            metadata,
        })
    }
}

/// Worker-internal envelope handed to the supervisor.
///
/// Carries the preprocessed view of one inbound message: original and
/// English text, detected language, audio flags, and a compact memory
/// snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingEnvelope {
    /// Always [`INBOUND_ENVELOPE_SCHEMA`].
    pub schema: String,
    pub source: String,
    pub user_id: String,
    pub message_id: String,
    pub conversation_id: String,
    /// The stream store's entry id, for tracing.
    pub stream_message_id: String,
    pub timestamp: Option<String>,
    pub original_text: String,
    pub english_text: String,
    pub detected_language: String,
    pub is_english: bool,
    pub requires_translation_to_english: bool,
    pub inbound_has_audio: bool,
    pub reply_in_audio: bool,

    /// Compact memory snapshot (profile + recent events), if prefetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_context: Option<serde_json::Value>,
}

impl ProcessingEnvelope {
    /// Render the supervisor input message:
    /// `INPUT_ENVELOPE_JSON:\n<json>\n`.
    pub fn to_supervisor_input(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".into());
        format!("{INPUT_ENVELOPE_PREFIX}\n{json}\n")
    }
}

/// An outbound reply published by the worker onto the outbound stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Idempotency key; a fresh UUID per publish.
    pub out_id: String,

    /// The inbound `message_id` this reply answers.
    pub correlation_id: String,

    pub conversation_id: String,
    pub source: String,
    pub user_id: String,

    /// User-facing reply; never empty.
    pub reply_text: String,

    /// Public URL of a synthesized audio reply, when one was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_audio_url: Option<String>,

    /// MIME type for `reply_audio_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_audio_mime_type: Option<String>,

    pub status: ReplyStatus,
    pub timestamp: DateTime<Utc>,

    /// Inbound metadata echoed through for the channel sender, as a raw
    /// JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl OutboundEnvelope {
    /// Encode into the flat string map appended to the stream.
    pub fn encode(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("out_id".into(), self.out_id.clone());
        fields.insert("correlation_id".into(), self.correlation_id.clone());
        fields.insert("conversation_id".into(), self.conversation_id.clone());
        fields.insert("source".into(), self.source.clone());
        fields.insert("user_id".into(), self.user_id.clone());
        fields.insert("reply_text".into(), self.reply_text.clone());
        fields.insert("status".into(), self.status.as_str().into());
        fields.insert("timestamp".into(), self.timestamp.to_rfc3339());
        if let Some(url) = &self.reply_audio_url {
            fields.insert("reply_audio_url".into(), url.clone());
        }
        if let Some(mime) = &self.reply_audio_mime_type {
            fields.insert("reply_audio_mime_type".into(), mime.clone());
        }
        if let Some(meta) = &self.metadata {
            fields.insert("metadata".into(), meta.clone());
        }
        fields
    }

    /// Decode a stream entry back into an envelope.
    pub fn decode(fields: &HashMap<String, String>) -> Result<Self, EnvelopeError> {
        let out_id = non_empty(fields, "out_id")
            .ok_or(EnvelopeError::MissingField("out_id"))?
            .to_string();
        let status = match fields.get("status").map(String::as_str) {
            Some("error") => ReplyStatus::Error,
            _ => ReplyStatus::Success,
        };
        let timestamp = parse_timestamp(fields.get("timestamp").map(String::as_str))?;

        Ok(Self {
            out_id,
            correlation_id: field_or(fields, "correlation_id", ""),
            conversation_id: field_or(fields, "conversation_id", ""),
            source: field_or(fields, "source", "unknown"),
            user_id: field_or(fields, "user_id", ""),
            reply_text: field_or(fields, "reply_text", ""),
            reply_audio_url: non_empty(fields, "reply_audio_url").map(str::to_string),
            reply_audio_mime_type: non_empty(fields, "reply_audio_mime_type").map(str::to_string),
            status,
            timestamp,
            metadata: fields.get("metadata").cloned(),
        })
    }
}

fn field_or(fields: &HashMap<String, String>, key: &str, default: &str) -> String {
    fields
        .get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn non_empty<'a>(fields: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    fields.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn parse_timestamp(raw: Option<&str>) -> Result<DateTime<Utc>, EnvelopeError> {
    match raw {
        None => Err(EnvelopeError::MissingField("timestamp")),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| EnvelopeError::InvalidField {
                field: "timestamp",
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inbound() -> InboundEnvelope {
        InboundEnvelope {
            message_id: "msg-1".into(),
            source: "whatsapp".into(),
            user_id: "whatsapp:+14155550100".into(),
            conversation_id: "msg-1".into(),
            text: "hello".into(),
            timestamp: Utc::now(),
            metadata: MessageMetadata {
                num_media: 1,
                media: vec![MediaItem {
                    url: "https://api.example.com/media/1".into(),
                    content_type: "audio/ogg".into(),
                }],
                extra: {
                    let mut m = serde_json::Map::new();
                    m.insert("message_sid".into(), serde_json::json!("SM_abc"));
                    m
                },
            },
        }
    }

    #[test]
    fn inbound_encode_decode_roundtrip() {
        let env = sample_inbound();
        let fields = env.encode();
        let restored = InboundEnvelope::decode(&fields).unwrap();
        assert_eq!(restored, env);
    }

    #[test]
    fn inbound_encode_all_fields_are_strings() {
        let fields = sample_inbound().encode();
        // The map itself guarantees string values; check the structured
        // field is JSON-encoded rather than flattened.
        let meta: MessageMetadata = serde_json::from_str(&fields["metadata"]).unwrap();
        assert_eq!(meta.num_media, 1);
        assert_eq!(meta.extra["message_sid"], "SM_abc");
    }

    #[test]
    fn inbound_decode_defaults_conversation_to_message_id() {
        let mut fields = sample_inbound().encode();
        fields.remove("conversation_id");
        let restored = InboundEnvelope::decode(&fields).unwrap();
        assert_eq!(restored.conversation_id, "msg-1");
    }

    #[test]
    fn inbound_decode_missing_message_id_fails() {
        let mut fields = sample_inbound().encode();
        fields.remove("message_id");
        assert!(matches!(
            InboundEnvelope::decode(&fields),
            Err(EnvelopeError::MissingField("message_id"))
        ));
    }

    #[test]
    fn inbound_decode_bad_metadata_decays_to_empty() {
        let mut fields = sample_inbound().encode();
        fields.insert("metadata".into(), "{not json".into());
        let restored = InboundEnvelope::decode(&fields).unwrap();
        assert!(restored.metadata.media.is_empty());
        assert_eq!(restored.metadata.num_media, 0);
    }

    #[test]
    fn media_item_audio_detection() {
        let audio = MediaItem {
            url: "u".into(),
            content_type: "Audio/OGG; codecs=opus".into(),
        };
        let image = MediaItem {
            url: "u".into(),
            content_type: "image/jpeg".into(),
        };
        assert!(audio.is_audio());
        assert!(!image.is_audio());
    }

    #[test]
    fn metadata_first_audio_skips_non_audio() {
        let meta = MessageMetadata {
            num_media: 2,
            media: vec![
                MediaItem {
                    url: "img".into(),
                    content_type: "image/png".into(),
                },
                MediaItem {
                    url: "voice".into(),
                    content_type: "audio/ogg".into(),
                },
            ],
            extra: Default::default(),
        };
        assert_eq!(meta.first_audio().unwrap().url, "voice");
        assert!(meta.has_audio());
    }

    #[test]
    fn processing_envelope_supervisor_input_format() {
        let env = ProcessingEnvelope {
            schema: INBOUND_ENVELOPE_SCHEMA.into(),
            source: "whatsapp".into(),
            user_id: "u1".into(),
            message_id: "m1".into(),
            conversation_id: "c1".into(),
            stream_message_id: "1-0".into(),
            timestamp: None,
            original_text: "hola".into(),
            english_text: "hello".into(),
            detected_language: "Spanish".into(),
            is_english: false,
            requires_translation_to_english: true,
            inbound_has_audio: false,
            reply_in_audio: false,
            memory_context: None,
        };
        let input = env.to_supervisor_input();
        assert!(input.starts_with("INPUT_ENVELOPE_JSON:\n"));
        assert!(input.ends_with('\n'));
        let json: serde_json::Value =
            serde_json::from_str(input.trim_start_matches("INPUT_ENVELOPE_JSON:\n").trim())
                .unwrap();
        assert_eq!(json["schema"], "inbound_envelope_v1");
        assert_eq!(json["english_text"], "hello");
    }

    #[test]
    fn outbound_roundtrip_with_audio() {
        let env = OutboundEnvelope {
            out_id: "out-1".into(),
            correlation_id: "msg-1".into(),
            conversation_id: "conv-1".into(),
            source: "whatsapp".into(),
            user_id: "whatsapp:+1".into(),
            reply_text: "done".into(),
            reply_audio_url: Some("https://cdn.example.com/media/tts/a.mp3".into()),
            reply_audio_mime_type: Some("audio/mpeg".into()),
            status: ReplyStatus::Success,
            timestamp: Utc::now(),
            metadata: Some(r#"{"message_sid":"SM_x"}"#.into()),
        };
        let restored = OutboundEnvelope::decode(&env.encode()).unwrap();
        assert_eq!(restored, env);
    }

    #[test]
    fn outbound_roundtrip_minimal() {
        let env = OutboundEnvelope {
            out_id: "out-2".into(),
            correlation_id: "msg-2".into(),
            conversation_id: "msg-2".into(),
            source: "whatsapp".into(),
            user_id: "whatsapp:+2".into(),
            reply_text: "hi".into(),
            reply_audio_url: None,
            reply_audio_mime_type: None,
            status: ReplyStatus::Error,
            timestamp: Utc::now(),
            metadata: None,
        };
        let fields = env.encode();
        assert!(!fields.contains_key("reply_audio_url"));
        let restored = OutboundEnvelope::decode(&fields).unwrap();
        assert_eq!(restored, env);
        assert_eq!(restored.status, ReplyStatus::Error);
    }

    #[test]
    fn outbound_decode_missing_out_id_fails() {
        let fields = HashMap::from([("reply_text".to_string(), "hi".to_string())]);
        assert!(OutboundEnvelope::decode(&fields).is_err());
    }
}
