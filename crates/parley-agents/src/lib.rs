//! Agent composition and supervisor runtime.
//!
//! The [`composer`] turns discovered tool records into a routable set of
//! specialized agents (LLM-driven categorization constrained by server
//! rules and policy packs). The [`supervisor`] assembles those agents
//! into an executable graph: one supervisor node routing via custom
//! `transfer_to_<agent>` handoff tools, per-agent tool loops, utility
//! tools, and a structured final reply. The [`assembler`] turns the run
//! transcript into a user-safe reply without ever leaking internal
//! routing chatter.

pub mod assembler;
pub mod composer;
pub mod error;
pub mod placeholder;
pub mod policy;
pub mod prompts;
pub mod supervisor;
pub mod supervisor_tools;
pub mod transcript;

pub use assembler::extract_reply_text;
pub use composer::AgentComposer;
pub use error::{AgentError, Result};
pub use supervisor::{Supervisor, SupervisorOutcome};
pub use transcript::AgentMessage;
