//! Core types for the parley conversational gateway.
//!
//! This crate defines the data model shared by every other crate in the
//! workspace:
//!
//! - [`envelope`] -- the flat, string-valued records that travel through
//!   the inbound and outbound streams, plus the processing envelope the
//!   worker hands to the supervisor
//! - [`agent`] -- discovered tool records, composed agent definitions,
//!   server rules, and policy packs
//! - [`reply`] -- the supervisor's structured reply contract
//! - [`memory`] -- memory documents and the pipelined read snapshot
//! - [`config`] -- process settings with serde defaults
//!
//! Everything here is plain data: no I/O, no async.

pub mod agent;
pub mod config;
pub mod envelope;
pub mod memory;
pub mod reply;

pub use agent::{
    AgentDefinition, AgentDefinitions, AgentRules, DesiredAgent, PolicyPack, ServerRules,
    ToolRecord,
};
pub use config::{ConfigError, Settings};
pub use envelope::{
    EnvelopeError, InboundEnvelope, MediaItem, MessageMetadata, OutboundEnvelope,
    ProcessingEnvelope,
};
pub use memory::{MemoryContext, MemoryEvent};
pub use reply::{ReplyStatus, SupervisorStructuredReply};
