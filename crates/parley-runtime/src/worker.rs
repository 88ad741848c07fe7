//! Inbound stream worker.
//!
//! Consumes the inbound stream with a consumer group, processes entries
//! concurrently under a bounded semaphore, and treats the final ACK as
//! the single commit point: an entry is acknowledged only after its
//! reply has been published to the outbound stream. Every failure path
//! before that leaves the entry pending for redelivery.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_agents::{Supervisor, extract_reply_text};
use parley_stream::{Memory, OutboundPublisher, Streams, SuccessRecord, client::StreamEntry};
use parley_tools::speech::guess_audio_mime;
use parley_tools::{TextToSpeechTool, ToolContext};
use parley_types::memory::truncate;
use parley_types::{
    InboundEnvelope, MemoryContext, OutboundEnvelope, SupervisorStructuredReply,
};

use crate::error::Result;
use crate::preprocess::Preprocessor;

/// Per-field cap applied to memory snapshots injected into the prompt.
const MEMORY_FIELD_LIMIT: usize = 300;

/// How many recent events travel in the envelope snapshot.
const MEMORY_EVENTS_LIMIT: usize = 5;

/// Worker tunables, taken from settings at bootstrap.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub inbound_stream: String,
    pub group: String,
    pub consumer: String,
    pub outbound_stream: String,
    pub max_concurrency: usize,
    pub consume_count: usize,
    pub consume_block_ms: u64,
    /// Synthesize an audio reply when the inbound message had audio.
    pub reply_with_audio: bool,
    pub media_root_dir: PathBuf,
    /// Public base for generated media URLs.
    pub media_public_base: String,
}

/// The inbound-stream consumer.
pub struct StreamWorker {
    streams: Arc<dyn Streams>,
    supervisor: Arc<Supervisor>,
    preprocessor: Arc<Preprocessor>,
    memory: Arc<dyn Memory>,
    tts: Option<Arc<TextToSpeechTool>>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
}

impl StreamWorker {
    pub fn new(
        streams: Arc<dyn Streams>,
        supervisor: Arc<Supervisor>,
        preprocessor: Arc<Preprocessor>,
        memory: Arc<dyn Memory>,
        tts: Option<Arc<TextToSpeechTool>>,
        config: WorkerConfig,
    ) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Arc::new(Self {
            streams,
            supervisor,
            preprocessor,
            memory,
            tts,
            config,
            semaphore,
        })
    }

    /// Run the consume loop until cancelled.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        self.streams
            .ensure_group(&self.config.inbound_stream, &self.config.group)
            .await?;

        info!(
            stream = %self.config.inbound_stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            max_concurrency = self.config.max_concurrency,
            "worker started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("worker shutting down");
                    return Ok(());
                }
                consumed = self.streams.consume(
                    &self.config.inbound_stream,
                    &self.config.group,
                    &self.config.consumer,
                    self.config.consume_count,
                    self.config.consume_block_ms,
                ) => {
                    match consumed {
                        Ok(entries) => {
                            for entry in entries {
                                let worker = Arc::clone(&self);
                                let semaphore = Arc::clone(&self.semaphore);
                                tokio::spawn(async move {
                                    let Ok(_permit) = semaphore.acquire_owned().await else {
                                        return;
                                    };
                                    let entry_id = entry.id.clone();
                                    if let Err(e) = worker.process_entry(entry).await {
                                        // No ACK: the entry stays pending
                                        // for redelivery.
                                        error!(entry_id = %entry_id, error = %e, "failed to process message");
                                    }
                                });
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "worker loop error");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    /// Process one inbound entry end to end.
    ///
    /// ACK rule: acknowledge only after the outbound publish succeeds.
    pub async fn process_entry(&self, entry: StreamEntry) -> Result<()> {
        let total_start = Instant::now();

        let inbound = match InboundEnvelope::decode(&entry.fields) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Malformed entries can only loop forever; drain them.
                warn!(entry_id = %entry.id, error = %e, "poison inbound entry, draining");
                self.streams
                    .ack(&self.config.inbound_stream, &self.config.group, &entry.id)
                    .await?;
                return Ok(());
            }
        };

        let lag_ms = (Utc::now() - inbound.timestamp).num_milliseconds();
        info!(
            entry_id = %entry.id,
            message_id = %inbound.message_id,
            source = %inbound.source,
            user_id = %inbound.user_id,
            lag_ms,
            "processing message"
        );

        // Fresh grounding tracker for this message.
        let ctx = ToolContext::for_message(
            &inbound.user_id,
            &inbound.conversation_id,
            &inbound.message_id,
            &inbound.source,
            &entry.id,
        );

        let pre = self.preprocessor.prepare(&inbound, &entry.id).await;
        let mut processing = pre.envelope;
        let immediate = pre.immediate_reply.is_some();

        let (reply_text, reply, grounded) = match pre.immediate_reply {
            Some(immediate) => {
                debug!(entry_id = %entry.id, "immediate reply, skipping supervisor");
                (immediate.clone(), SupervisorStructuredReply::text(immediate), false)
            }
            None => {
                // Best-effort memory prefetch, compacted into the envelope.
                match self
                    .memory
                    .get_context(&inbound.user_id, &inbound.conversation_id)
                    .await
                {
                    Ok(context) if !context.is_empty() => {
                        processing.memory_context = Some(compact_memory_context(&context));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(entry_id = %entry.id, error = %e, "memory prefetch failed")
                    }
                }

                let input = processing.to_supervisor_input();
                let supervise_start = Instant::now();
                let outcome = self.supervisor.run(&input, &ctx).await?;
                info!(
                    entry_id = %entry.id,
                    supervise_ms = supervise_start.elapsed().as_millis() as u64,
                    "supervisor done"
                );

                let mut reply_text = extract_reply_text(&outcome.transcript);
                if reply_text.is_empty() {
                    reply_text = "Done.".to_string();
                }
                let grounded = ctx.grounding.any_grounded_success(false);
                (reply_text, outcome.reply, grounded)
            }
        };

        // Audio reply, best-effort: any failure falls back to text-only.
        let mut reply_audio_url = None;
        let mut reply_audio_mime_type = None;
        if processing.reply_in_audio
            && self.config.reply_with_audio
            && reply.status.is_success()
            && !immediate
        {
            match self.prepare_audio_reply(&reply, &reply_text).await {
                Ok(Some((url, mime))) => {
                    reply_audio_url = Some(url);
                    reply_audio_mime_type = Some(mime);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "audio reply failed, sending text only")
                }
            }
        }

        // Grounded-memory gate: persist only successful runs backed by a
        // real tool execution.
        if reply.status.is_success() && grounded {
            self.memory
                .write_success(&SuccessRecord {
                    user_id: inbound.user_id.clone(),
                    conversation_id: inbound.conversation_id.clone(),
                    original_text: processing.original_text.clone(),
                    english_text: processing.english_text.clone(),
                    detected_language: Some(processing.detected_language.clone())
                        .filter(|l| !l.is_empty()),
                    inbound_has_audio: processing.inbound_has_audio,
                    reply_text: reply_text.clone(),
                    actions: reply.actions.clone(),
                    task_instructions: None,
                    reply_audio_url: reply_audio_url.clone(),
                    write_user_event: true,
                })
                .await;
        } else {
            info!(
                entry_id = %entry.id,
                status = reply.status.as_str(),
                grounded,
                "memory write skipped"
            );
        }

        let outbound = OutboundEnvelope {
            out_id: Uuid::new_v4().to_string(),
            correlation_id: inbound.message_id.clone(),
            conversation_id: inbound.conversation_id.clone(),
            source: inbound.source.clone(),
            user_id: inbound.user_id.clone(),
            reply_text,
            reply_audio_url,
            reply_audio_mime_type,
            status: reply.status,
            timestamp: Utc::now(),
            metadata: passthrough_metadata(entry.fields.get("metadata").map(String::as_str)),
        };

        let publisher = OutboundPublisher::new(
            Arc::clone(&self.streams),
            self.config.outbound_stream.clone(),
        );
        let outbound_entry_id = publisher.publish(&outbound).await?;
        info!(
            entry_id = %entry.id,
            outbound_entry_id = %outbound_entry_id,
            correlation_id = %outbound.correlation_id,
            "outbound published"
        );

        // ACK only after the outbound publish.
        self.streams
            .ack(&self.config.inbound_stream, &self.config.group, &entry.id)
            .await?;
        info!(
            entry_id = %entry.id,
            total_ms = total_start.elapsed().as_millis() as u64,
            "message acknowledged"
        );
        Ok(())
    }

    /// Host the synthesized audio under the media root; returns the
    /// public URL + MIME type.
    async fn prepare_audio_reply(
        &self,
        reply: &SupervisorStructuredReply,
        reply_text: &str,
    ) -> Result<Option<(String, String)>> {
        // Prefer a file the supervisor already synthesized during the run.
        let (src, format) = match &reply.tts_file_path {
            Some(path) if Path::new(path).is_file() => (
                PathBuf::from(path),
                reply
                    .tts_format
                    .clone()
                    .unwrap_or_else(|| "mp3".to_string()),
            ),
            _ => match &self.tts {
                Some(tts) => {
                    let defaults = tts.defaults().clone();
                    let (path, format) = tts
                        .synthesize_to_file(
                            reply_text,
                            &defaults.voice,
                            &defaults.model,
                            &defaults.format,
                        )
                        .await
                        .map_err(parley_agents::AgentError::Tool)?;
                    (path, format)
                }
                None => return Ok(None),
            },
        };

        let rel_path = format!("tts/{}.{format}", Uuid::new_v4().simple());
        let dst = self.config.media_root_dir.join(&rel_path);
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(parley_tools::SpeechError::Io)?;
        }
        tokio::fs::copy(&src, &dst)
            .await
            .map_err(parley_tools::SpeechError::Io)?;

        let url = format!(
            "{}/media/{rel_path}",
            self.config.media_public_base.trim_end_matches('/')
        );
        let mime = guess_audio_mime(&rel_path).to_string();
        debug!(url = %url, "audio reply hosted");
        Ok(Some((url, mime)))
    }
}

/// Compact a memory snapshot for prompt injection: the profile plus at
/// most five recent events with their text fields truncated.
fn compact_memory_context(context: &MemoryContext) -> serde_json::Value {
    let events: Vec<serde_json::Value> = context
        .recent_events
        .iter()
        .take(MEMORY_EVENTS_LIMIT)
        .map(|event| {
            serde_json::json!({
                "ts": event.get("ts"),
                "original_text": truncate(str_of(event, "original_text"), MEMORY_FIELD_LIMIT),
                "english_text": truncate(str_of(event, "english_text"), MEMORY_FIELD_LIMIT),
                "reply_text": truncate(str_of(event, "reply_text"), MEMORY_FIELD_LIMIT),
                "actions": event.get("actions").cloned().unwrap_or_else(|| serde_json::json!([])),
            })
        })
        .collect();

    serde_json::json!({
        "user_profile": context.user_profile,
        "recent_events": events,
    })
}

fn str_of<'a>(value: &'a serde_json::Value, key: &str) -> &'a str {
    value.get(key).and_then(serde_json::Value::as_str).unwrap_or_default()
}

/// Echo inbound metadata onto the outbound envelope, guaranteeing valid
/// JSON.
fn passthrough_metadata(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(_) => Some(raw.to_string()),
        Err(_) => Some(serde_json::json!({ "raw": raw }).to_string()),
    }
}
