//! Execution runtime.
//!
//! Two symmetric consumer loops around the stream store:
//!
//! - [`worker::StreamWorker`] consumes the inbound stream, runs each
//!   message through preprocessing and the supervisor, and publishes the
//!   reply to the outbound stream, acknowledging only after the publish
//!   succeeds.
//! - [`dispatcher::Dispatcher`] consumes the outbound stream and
//!   delivers replies through channel senders with idempotent-send
//!   semantics, acknowledging only after a successful (or provenly
//!   duplicate) delivery.
//!
//! [`bootstrap`] wires the whole thing together once per process:
//! provider, tool discovery, local tools, composition, supervisor.

pub mod bootstrap;
pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod preprocess;
pub mod worker;

pub use bootstrap::{build_dispatcher, build_worker};
pub use channels::{ChannelError, ChannelSender, TwilioWhatsAppSender};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{Result, RuntimeError};
pub use preprocess::{PreSupervisorResult, Preprocessor};
pub use worker::{StreamWorker, WorkerConfig};
