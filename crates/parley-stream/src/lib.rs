//! Stream, idempotency, and memory stores.
//!
//! Wraps the ordered-log store (Redis streams + consumer groups) behind
//! the [`Streams`] trait, and provides the idempotency store and the
//! JSON-document memory store on the same connection.
//!
//! Design rules carried by this crate:
//!
//! - Stream fields are flat string maps; structured values are
//!   JSON-encoded by the caller.
//! - `ensure_group` is idempotent: re-creating an existing group is fine.
//! - Memory writes are best-effort and never propagate failures.

pub mod client;
pub mod error;
pub mod idempotency;
pub mod memory;
pub mod publisher;

pub use client::{RedisStreams, StreamEntry, Streams};
pub use error::{Result, StreamError};
pub use idempotency::{Idempotency, RedisIdempotencyStore};
pub use memory::{Memory, MemoryConfig, RedisMemoryStore, SuccessRecord};
pub use publisher::{InboundPublisher, OutboundPublisher};
