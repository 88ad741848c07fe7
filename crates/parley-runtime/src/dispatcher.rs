//! Outbound dispatcher.
//!
//! Consumes the outbound stream and delivers replies through the
//! channel sender matching each envelope's `source`. Duplicate sends
//! are prevented by the idempotency store: an `out_id` that was already
//! delivered is skipped and acknowledged. Poison entries (missing
//! required fields) are acknowledged to drain; delivery failures are
//! not acknowledged, so the store redelivers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use parley_stream::{Idempotency, Streams, client::StreamEntry};
use parley_types::OutboundEnvelope;

use crate::channels::ChannelSender;
use crate::error::Result;

/// Dispatcher tunables, taken from settings at bootstrap.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub outbound_stream: String,
    pub group: String,
    pub consumer: String,
    pub max_concurrency: usize,
    pub consume_count: usize,
    pub consume_block_ms: u64,
}

/// The outbound-stream consumer.
pub struct Dispatcher {
    streams: Arc<dyn Streams>,
    idempotency: Arc<dyn Idempotency>,
    senders: HashMap<String, Arc<dyn ChannelSender>>,
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        streams: Arc<dyn Streams>,
        idempotency: Arc<dyn Idempotency>,
        senders: Vec<Arc<dyn ChannelSender>>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        let senders = senders
            .into_iter()
            .map(|s| (s.source().to_string(), s))
            .collect();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Arc::new(Self {
            streams,
            idempotency,
            senders,
            config,
            semaphore,
        })
    }

    /// Run the consume loop until cancelled.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        self.streams
            .ensure_group(&self.config.outbound_stream, &self.config.group)
            .await?;

        info!(
            stream = %self.config.outbound_stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            max_concurrency = self.config.max_concurrency,
            "dispatcher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("dispatcher shutting down");
                    return Ok(());
                }
                consumed = self.streams.consume(
                    &self.config.outbound_stream,
                    &self.config.group,
                    &self.config.consumer,
                    self.config.consume_count,
                    self.config.consume_block_ms,
                ) => {
                    match consumed {
                        Ok(entries) => {
                            for entry in entries {
                                let dispatcher = Arc::clone(&self);
                                let semaphore = Arc::clone(&self.semaphore);
                                tokio::spawn(async move {
                                    let Ok(_permit) = semaphore.acquire_owned().await else {
                                        return;
                                    };
                                    let entry_id = entry.id.clone();
                                    if let Err(e) = dispatcher.process_entry(entry).await {
                                        error!(entry_id = %entry_id, error = %e, "delivery failed");
                                    }
                                });
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "dispatcher loop error");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    /// Deliver one outbound entry.
    ///
    /// ACK rule: acknowledge after a successful send (or a proven
    /// duplicate / poison entry). A failed send is not acknowledged.
    pub async fn process_entry(&self, entry: StreamEntry) -> Result<()> {
        let envelope = match OutboundEnvelope::decode(&entry.fields) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "invalid outbound payload, draining");
                self.ack(&entry.id).await?;
                return Ok(());
            }
        };

        if envelope.user_id.trim().is_empty() || envelope.reply_text.trim().is_empty() {
            warn!(
                entry_id = %entry.id,
                out_id = %envelope.out_id,
                "outbound entry missing required fields, draining"
            );
            self.ack(&entry.id).await?;
            return Ok(());
        }

        // Idempotency: a replayed entry is acknowledged without sending.
        if self.idempotency.was_sent(&envelope.out_id).await? {
            info!(
                entry_id = %entry.id,
                out_id = %envelope.out_id,
                "outbound already delivered, idempotent skip"
            );
            self.ack(&entry.id).await?;
            return Ok(());
        }

        let Some(sender) = self.senders.get(&envelope.source) else {
            // No adapter for this channel: leave pending so the entry is
            // retried once an adapter exists.
            return Err(crate::RuntimeError::Config(format!(
                "unsupported outbound source '{}'",
                envelope.source
            )));
        };

        info!(
            entry_id = %entry.id,
            out_id = %envelope.out_id,
            source = %envelope.source,
            user_id = %envelope.user_id,
            "delivering outbound"
        );

        let provider_id = match &envelope.reply_audio_url {
            Some(media_url) => {
                sender
                    .send_media(&envelope.user_id, &envelope.reply_text, media_url)
                    .await?
            }
            None => {
                sender
                    .send_text(&envelope.user_id, &envelope.reply_text)
                    .await?
            }
        };

        self.idempotency.mark_sent(&envelope.out_id).await?;
        self.ack(&entry.id).await?;
        info!(
            entry_id = %entry.id,
            out_id = %envelope.out_id,
            provider_id = %provider_id,
            "outbound acknowledged"
        );
        Ok(())
    }

    async fn ack(&self, entry_id: &str) -> Result<()> {
        self.streams
            .ack(&self.config.outbound_stream, &self.config.group, entry_id)
            .await?;
        Ok(())
    }
}
