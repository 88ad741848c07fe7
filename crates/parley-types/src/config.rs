//! Process settings.
//!
//! Settings are loaded from an optional TOML file with serde defaults for
//! every field, then secrets are hydrated from the environment
//! (`TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `OPENAI_API_KEY`). Every
//! option named in the configuration contract has a field here.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for settings loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Process-wide settings with defaults for local development.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // ── HTTP surface ─────────────────────────────────────────────────
    /// Bind address for the gateway (webhook + media host).
    pub bind_addr: String,
    /// Public base URL of this deployment.
    pub base_url: String,
    /// Outbound HTTP timeout in seconds (LLM, STT/TTS, Twilio).
    pub http_timeout_secs: u64,

    // ── LLM ──────────────────────────────────────────────────────────
    /// Provider tag, informational (`openai`, or any compatible host).
    pub llm_provider: String,
    /// OpenAI-compatible base URL.
    pub llm_base_url: String,
    /// Model used for the supervisor, agents, and composer.
    pub llm_model_name: String,
    /// API key; hydrated from `OPENAI_API_KEY` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    // ── Speech ───────────────────────────────────────────────────────
    pub openai_transcriptions_url: String,
    pub openai_translations_url: String,
    pub openai_tts_url: String,
    pub stt_model_name: String,
    /// Use the translations endpoint so transcripts come back in English.
    pub openai_stt_force_english: bool,
    pub tts_voice: String,
    pub tts_model_name: String,
    pub tts_format: String,

    // ── Twilio ───────────────────────────────────────────────────────
    /// Hydrated from `TWILIO_ACCOUNT_SID` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twilio_account_sid: Option<String>,
    /// Hydrated from `TWILIO_AUTH_TOKEN` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twilio_auth_token: Option<String>,
    /// WhatsApp sender address (`whatsapp:+1...`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twilio_whatsapp_from: Option<String>,
    /// Validate the webhook signature (disable only for local testing).
    pub twilio_validate_signature: bool,

    // ── Redis / streams ──────────────────────────────────────────────
    pub redis_url: String,
    pub redis_stream_inbound: String,
    pub redis_stream_outbound: String,
    pub redis_consumer_group: String,
    pub redis_consumer_name: String,
    pub redis_outbound_consumer_group: String,
    pub redis_outbound_consumer_name: String,
    pub worker_max_concurrency: usize,
    pub outbound_max_concurrency: usize,
    /// Batch size per consume call.
    pub consume_count: usize,
    /// Block timeout per consume call, in milliseconds.
    pub consume_block_ms: u64,
    /// TTL for `sent:{out_id}` idempotency marks.
    pub outbound_idempotency_ttl_seconds: u64,

    // ── Memory ───────────────────────────────────────────────────────
    pub memory_key_prefix: String,
    pub memory_user_events_max_items: usize,
    /// 0 disables expiry.
    pub memory_user_events_ttl_seconds: u64,
    /// 0 disables expiry.
    pub memory_user_profile_ttl_seconds: u64,
    /// 0 falls back to 12 hours.
    pub memory_conversation_ttl_seconds: u64,

    // ── Agents / tools ───────────────────────────────────────────────
    /// Hard cap enforced during categorization.
    pub max_tools_per_agent: usize,
    /// Tool-server config file (stdio/http server definitions).
    pub mcp_config_path: String,
    /// Optional per-server rules document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_rules_path: Option<String>,
    /// Directory of policy pack JSON files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_packs_dir: Option<String>,
    pub tool_output_trimming_enabled: bool,
    /// Hard character cap applied to trimmed tool output.
    pub tool_trim_max_chars: usize,
    /// Max items kept in trimmed search summaries.
    pub tool_trim_max_items: usize,

    // ── Media / audio replies ────────────────────────────────────────
    /// Disk root served by the media host.
    pub media_root_dir: String,
    /// Public base for generated media URLs; falls back to `base_url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_public_base_url: Option<String>,
    /// Synthesize an audio reply whenever the inbound message had audio.
    pub reply_with_audio_when_inbound_has_audio: bool,

    // ── Prompt placeholders ──────────────────────────────────────────
    /// Parent page for note-writing integrations, rendered into agent
    /// system messages via `{{NOTES_PARENT_PAGE_ID}}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes_parent_page_id: Option<String>,
    /// Additional `{{KEY}}` values, keyed by upper- or snake-case name.
    pub placeholders: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".into(),
            base_url: "http://localhost:8000".into(),
            http_timeout_secs: 120,

            llm_provider: "openai".into(),
            llm_base_url: "https://api.openai.com/v1".into(),
            llm_model_name: "gpt-4o-mini".into(),
            openai_api_key: None,

            openai_transcriptions_url: "https://api.openai.com/v1/audio/transcriptions".into(),
            openai_translations_url: "https://api.openai.com/v1/audio/translations".into(),
            openai_tts_url: "https://api.openai.com/v1/audio/speech".into(),
            stt_model_name: "whisper-1".into(),
            openai_stt_force_english: true,
            tts_voice: "alloy".into(),
            tts_model_name: "tts-1".into(),
            tts_format: "mp3".into(),

            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_whatsapp_from: None,
            twilio_validate_signature: true,

            redis_url: "redis://127.0.0.1:6379/0".into(),
            redis_stream_inbound: "inbound_messages".into(),
            redis_stream_outbound: "outbound_messages".into(),
            redis_consumer_group: "agent_workers".into(),
            redis_consumer_name: "worker-1".into(),
            redis_outbound_consumer_group: "outbound_dispatchers".into(),
            redis_outbound_consumer_name: "dispatcher-1".into(),
            worker_max_concurrency: 10,
            outbound_max_concurrency: 10,
            consume_count: 10,
            consume_block_ms: 5000,
            outbound_idempotency_ttl_seconds: 7 * 24 * 60 * 60,

            memory_key_prefix: "mem".into(),
            memory_user_events_max_items: 15,
            memory_user_events_ttl_seconds: 0,
            memory_user_profile_ttl_seconds: 0,
            memory_conversation_ttl_seconds: 12 * 60 * 60,

            max_tools_per_agent: 5,
            mcp_config_path: "./config/mcp_servers.json".into(),
            agent_rules_path: None,
            policy_packs_dir: None,
            tool_output_trimming_enabled: true,
            tool_trim_max_chars: 4000,
            tool_trim_max_items: 5,

            media_root_dir: "./media".into(),
            media_public_base_url: None,
            reply_with_audio_when_inbound_has_audio: true,

            notes_parent_page_id: None,
            placeholders: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file, then hydrate secrets
    /// from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            None => Self::default(),
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                    path: p.display().to_string(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: p.display().to_string(),
                    source,
                })?
            }
        };
        settings.hydrate_secrets_from_env();
        Ok(settings)
    }

    /// Fill unset secrets from the environment.
    pub fn hydrate_secrets_from_env(&mut self) {
        if self.openai_api_key.is_none() {
            self.openai_api_key = env_non_empty("OPENAI_API_KEY");
        }
        if self.twilio_account_sid.is_none() {
            self.twilio_account_sid = env_non_empty("TWILIO_ACCOUNT_SID");
        }
        if self.twilio_auth_token.is_none() {
            self.twilio_auth_token = env_non_empty("TWILIO_AUTH_TOKEN");
        }
    }

    /// Public base for generated media URLs.
    pub fn media_base(&self) -> &str {
        self.media_public_base_url
            .as_deref()
            .unwrap_or(&self.base_url)
    }

    /// Resolve a `{{KEY}}` prompt placeholder.
    ///
    /// Lookup order: settings table by upper-case key, settings table by
    /// snake-case key, well-known settings fields, then the process
    /// environment. `None` means the placeholder stays unrendered.
    pub fn placeholder_value(&self, key: &str) -> Option<String> {
        if let Some(v) = self.placeholders.get(key).filter(|v| !v.is_empty()) {
            return Some(v.clone());
        }
        let snake = key.to_ascii_lowercase();
        if let Some(v) = self.placeholders.get(&snake).filter(|v| !v.is_empty()) {
            return Some(v.clone());
        }
        if snake == "notes_parent_page_id" {
            if let Some(v) = self.notes_parent_page_id.clone().filter(|v| !v.is_empty()) {
                return Some(v);
            }
        }
        env_non_empty(key)
    }

    /// Conversation-state TTL with the 12-hour floor applied.
    pub fn conversation_ttl_seconds(&self) -> u64 {
        if self.memory_conversation_ttl_seconds == 0 {
            12 * 60 * 60
        } else {
            self.memory_conversation_ttl_seconds
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_contract() {
        let s = Settings::default();
        assert_eq!(s.redis_stream_inbound, "inbound_messages");
        assert_eq!(s.redis_consumer_group, "agent_workers");
        assert_eq!(s.worker_max_concurrency, 10);
        assert_eq!(s.outbound_idempotency_ttl_seconds, 604_800);
        assert_eq!(s.max_tools_per_agent, 5);
        assert!(s.twilio_validate_signature);
        assert_eq!(s.tts_format, "mp3");
    }

    #[test]
    fn load_from_toml_overrides_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
            redis_stream_inbound = "in_test"
            worker_max_concurrency = 3
            notes_parent_page_id = "page-123"
            [placeholders]
            CALENDAR_ID = "cal-9"
            "#
        )
        .unwrap();

        let s = Settings::load(Some(f.path())).unwrap();
        assert_eq!(s.redis_stream_inbound, "in_test");
        assert_eq!(s.worker_max_concurrency, 3);
        // Untouched fields keep defaults.
        assert_eq!(s.redis_stream_outbound, "outbound_messages");
        assert_eq!(s.placeholders["CALENDAR_ID"], "cal-9");
    }

    #[test]
    fn load_missing_file_errors() {
        let err = Settings::load(Some(Path::new("/nonexistent/parley.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn placeholder_lookup_precedence() {
        let mut s = Settings::default();
        s.placeholders
            .insert("NOTES_PARENT_PAGE_ID".into(), "from-table".into());
        s.notes_parent_page_id = Some("from-field".into());
        // Table wins over the well-known field.
        assert_eq!(
            s.placeholder_value("NOTES_PARENT_PAGE_ID").as_deref(),
            Some("from-table")
        );

        s.placeholders.clear();
        assert_eq!(
            s.placeholder_value("NOTES_PARENT_PAGE_ID").as_deref(),
            Some("from-field")
        );
    }

    #[test]
    fn placeholder_snake_case_fallback() {
        let mut s = Settings::default();
        s.placeholders.insert("calendar_id".into(), "cal-1".into());
        assert_eq!(s.placeholder_value("CALENDAR_ID").as_deref(), Some("cal-1"));
    }

    #[test]
    fn placeholder_unknown_returns_none() {
        let s = Settings::default();
        assert!(s.placeholder_value("DEFINITELY_NOT_SET_ANYWHERE_42").is_none());
    }

    #[test]
    fn conversation_ttl_floor() {
        let mut s = Settings::default();
        s.memory_conversation_ttl_seconds = 0;
        assert_eq!(s.conversation_ttl_seconds(), 43_200);
        s.memory_conversation_ttl_seconds = 60;
        assert_eq!(s.conversation_ttl_seconds(), 60);
    }

    #[test]
    fn media_base_falls_back_to_base_url() {
        let mut s = Settings::default();
        assert_eq!(s.media_base(), "http://localhost:8000");
        s.media_public_base_url = Some("https://cdn.example.com".into());
        assert_eq!(s.media_base(), "https://cdn.example.com");
    }
}
