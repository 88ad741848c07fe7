//! Stream publishers.
//!
//! [`InboundPublisher`] is used by the ingress: it assigns a fresh
//! `message_id`, defaults the conversation to it, stamps the time, and
//! appends the envelope to the inbound stream. [`OutboundPublisher`] is
//! used by the worker to append replies to the outbound stream.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use parley_types::{InboundEnvelope, MessageMetadata, OutboundEnvelope};

use crate::client::Streams;
use crate::error::Result;

/// Publishes normalized inbound messages.
pub struct InboundPublisher {
    streams: Arc<dyn Streams>,
    stream_name: String,
}

impl InboundPublisher {
    pub fn new(streams: Arc<dyn Streams>, stream_name: impl Into<String>) -> Self {
        Self {
            streams,
            stream_name: stream_name.into(),
        }
    }

    /// Publish an inbound message; returns the store entry id and the
    /// envelope as published.
    pub async fn publish(
        &self,
        source: &str,
        user_id: &str,
        text: &str,
        conversation_id: Option<&str>,
        metadata: MessageMetadata,
    ) -> Result<(String, InboundEnvelope)> {
        let message_id = Uuid::new_v4().to_string();
        let envelope = InboundEnvelope {
            message_id: message_id.clone(),
            source: source.to_string(),
            user_id: user_id.to_string(),
            conversation_id: conversation_id.unwrap_or(&message_id).to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
            metadata,
        };

        info!(
            stream = %self.stream_name,
            message_id = %envelope.message_id,
            source,
            "publishing inbound message"
        );
        let entry_id = self
            .streams
            .append(&self.stream_name, &envelope.encode())
            .await?;
        debug!(stream = %self.stream_name, entry_id = %entry_id, "inbound published");
        Ok((entry_id, envelope))
    }
}

/// Publishes worker replies onto the outbound stream.
pub struct OutboundPublisher {
    streams: Arc<dyn Streams>,
    stream_name: String,
}

impl OutboundPublisher {
    pub fn new(streams: Arc<dyn Streams>, stream_name: impl Into<String>) -> Self {
        Self {
            streams,
            stream_name: stream_name.into(),
        }
    }

    /// Append an outbound envelope; returns the store entry id.
    pub async fn publish(&self, envelope: &OutboundEnvelope) -> Result<String> {
        let entry_id = self
            .streams
            .append(&self.stream_name, &envelope.encode())
            .await?;
        debug!(
            stream = %self.stream_name,
            entry_id = %entry_id,
            out_id = %envelope.out_id,
            correlation_id = %envelope.correlation_id,
            "outbound published"
        );
        Ok(entry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StreamEntry;
    use async_trait::async_trait;
    use parley_types::ReplyStatus;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records appends; other operations are unused here.
    struct RecordingStreams {
        appended: Mutex<Vec<(String, HashMap<String, String>)>>,
    }

    impl RecordingStreams {
        fn new() -> Self {
            Self {
                appended: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Streams for RecordingStreams {
        async fn append(
            &self,
            stream: &str,
            fields: &HashMap<String, String>,
        ) -> Result<String> {
            let mut appended = self.appended.lock().unwrap();
            appended.push((stream.to_string(), fields.clone()));
            Ok(format!("{}-0", appended.len()))
        }

        async fn ensure_group(&self, _stream: &str, _group: &str) -> Result<()> {
            Ok(())
        }

        async fn consume(
            &self,
            _stream: &str,
            _group: &str,
            _consumer: &str,
            _count: usize,
            _block_ms: u64,
        ) -> Result<Vec<StreamEntry>> {
            Ok(Vec::new())
        }

        async fn ack(&self, _stream: &str, _group: &str, _entry_id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn inbound_publish_assigns_ids_and_defaults() {
        let streams = Arc::new(RecordingStreams::new());
        let publisher = InboundPublisher::new(streams.clone(), "inbound_messages");

        let (entry_id, envelope) = publisher
            .publish("whatsapp", "whatsapp:+1", "hi", None, MessageMetadata::default())
            .await
            .unwrap();

        assert_eq!(entry_id, "1-0");
        assert!(!envelope.message_id.is_empty());
        assert_eq!(envelope.conversation_id, envelope.message_id);

        let appended = streams.appended.lock().unwrap();
        assert_eq!(appended[0].0, "inbound_messages");
        assert_eq!(appended[0].1["text"], "hi");
        assert_eq!(appended[0].1["source"], "whatsapp");
    }

    #[tokio::test]
    async fn inbound_publish_respects_conversation_id() {
        let streams = Arc::new(RecordingStreams::new());
        let publisher = InboundPublisher::new(streams, "in");
        let (_, envelope) = publisher
            .publish("whatsapp", "u", "t", Some("conv-7"), MessageMetadata::default())
            .await
            .unwrap();
        assert_eq!(envelope.conversation_id, "conv-7");
    }

    #[tokio::test]
    async fn outbound_publish_appends_encoded_envelope() {
        let streams = Arc::new(RecordingStreams::new());
        let publisher = OutboundPublisher::new(streams.clone(), "outbound_messages");

        let envelope = OutboundEnvelope {
            out_id: "o-1".into(),
            correlation_id: "m-1".into(),
            conversation_id: "c-1".into(),
            source: "whatsapp".into(),
            user_id: "u".into(),
            reply_text: "done".into(),
            reply_audio_url: None,
            reply_audio_mime_type: None,
            status: ReplyStatus::Success,
            timestamp: Utc::now(),
            metadata: None,
        };
        publisher.publish(&envelope).await.unwrap();

        let appended = streams.appended.lock().unwrap();
        assert_eq!(appended[0].0, "outbound_messages");
        assert_eq!(appended[0].1["out_id"], "o-1");
        assert_eq!(appended[0].1["status"], "success");
    }
}
