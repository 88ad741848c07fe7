//! Tool registry and call-hardening layer.
//!
//! Every tool the supervisor or an agent can call -- remote tool-server
//! tools and local in-process tools alike -- implements the [`Tool`]
//! trait and is registered in a [`ToolRegistry`] wrapped in a
//! [`ValidatingTool`]. The wrapper runs the full hardening pipeline on
//! each call:
//!
//! 1. argument normalization (per-tool, conservative)
//! 2. semantic preflight (per-tool, canonical `validation_error` payload)
//! 3. JSON-schema validation of arguments
//! 4. the call itself
//! 5. provider-error normalization (stable `validation_error` contract
//!    with repeat tracking)
//! 6. output trimming (compact summaries + hard character cap)
//! 7. grounding-event recording
//!
//! The [`context`] module carries the per-request state (identities and
//! the grounding tracker) through the call tree explicitly.

pub mod context;
pub mod language;
pub mod registry;
pub mod speech;
pub mod trim;
pub mod validate;

pub use context::{GroundingTracker, ToolContext, ToolEvent, is_internal_tool_name};
pub use language::{
    DETECT_TOOL_NAME, DetectAndTranslateTool, TRANSLATE_TOOL_NAME, TranslateTextTool,
    is_english_language,
};
pub use registry::{Tool, ToolError, ToolRegistry};
pub use speech::{
    SpeechClient, SpeechConfig, SpeechError, TTS_TOOL_NAME, TextToSpeechTool, TtsDefaults,
};
pub use trim::TrimConfig;
pub use validate::ValidatingTool;

/// Source-server tag for the local audio/language tools.
pub const LOCAL_AUDIO_SOURCE: &str = "local_audio";
