//! Idempotent-send marker store.
//!
//! The dispatcher consults [`Idempotency::was_sent`] before delivering and
//! calls [`Idempotency::mark_sent`] after a successful send, so stream
//! replays never reach the user twice. Marks live under `sent:{out_id}`
//! with a TTL.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use crate::client::RedisStreams;
use crate::error::Result;

/// Delivery-marker contract.
#[async_trait]
pub trait Idempotency: Send + Sync {
    /// Whether this `out_id` was already delivered within the TTL window.
    async fn was_sent(&self, out_id: &str) -> Result<bool>;

    /// Record a successful delivery.
    async fn mark_sent(&self, out_id: &str) -> Result<()>;
}

/// Redis-backed marker store.
pub struct RedisIdempotencyStore {
    client: RedisStreams,
    ttl_seconds: u64,
}

impl RedisIdempotencyStore {
    pub fn new(client: RedisStreams, ttl_seconds: u64) -> Self {
        Self {
            client,
            ttl_seconds,
        }
    }

    fn key(out_id: &str) -> String {
        format!("sent:{out_id}")
    }
}

#[async_trait]
impl Idempotency for RedisIdempotencyStore {
    async fn was_sent(&self, out_id: &str) -> Result<bool> {
        let mut con = self.client.connection();
        let val: Option<String> = con.get(Self::key(out_id)).await?;
        Ok(val.is_some())
    }

    async fn mark_sent(&self, out_id: &str) -> Result<()> {
        let mut con = self.client.connection();
        let _: () = con.set_ex(Self::key(out_id), "1", self.ttl_seconds).await?;
        debug!(out_id, ttl_s = self.ttl_seconds, "delivery marked sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        assert_eq!(
            RedisIdempotencyStore::key("a-b-c"),
            "sent:a-b-c"
        );
    }
}
