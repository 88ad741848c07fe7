//! JSON-document memory store.
//!
//! Three key families, all under a configurable prefix:
//!
//! - `mem:user:{user_id}:profile` -- `user_profile_v1`
//! - `mem:conv:{conversation_id}:state` -- `conversation_state_v1` (TTL)
//! - `mem:user:{user_id}:events` -- bounded newest-first list of
//!   `memory_event_v1` documents
//!
//! Reads are a single pipelined operation. Writes are deterministic and
//! worker-driven; [`RedisMemoryStore::write_success`] is best-effort and
//! never propagates failures, because memory must not break user replies.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use parley_types::memory::{
    CONVERSATION_STATE_SCHEMA, MemoryContext, MemoryEvent, USER_PROFILE_SCHEMA,
    clamp_events_max_items,
};

use crate::client::RedisStreams;
use crate::error::Result;

/// Tunables for the memory store, taken from settings at bootstrap.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub key_prefix: String,
    pub events_max_items: usize,
    /// 0 disables expiry on the events list.
    pub events_ttl_seconds: u64,
    /// 0 disables expiry on the profile.
    pub profile_ttl_seconds: u64,
    pub conversation_ttl_seconds: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            key_prefix: "mem".into(),
            events_max_items: 15,
            events_ttl_seconds: 0,
            profile_ttl_seconds: 0,
            conversation_ttl_seconds: 12 * 60 * 60,
        }
    }
}

/// Everything the worker knows after a successful, grounded run.
#[derive(Debug, Clone, Default)]
pub struct SuccessRecord {
    pub user_id: String,
    pub conversation_id: String,
    pub original_text: String,
    pub english_text: String,
    pub detected_language: Option<String>,
    pub inbound_has_audio: bool,
    pub reply_text: String,
    pub actions: Vec<String>,
    pub task_instructions: Option<String>,
    pub reply_audio_url: Option<String>,
    /// Append a memory event only when the run was grounded.
    pub write_user_event: bool,
}

/// Memory contract consumed by the worker and the supervisor's
/// `memory_get_context` tool.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Fetch user + conversation memory in one pipelined read.
    async fn get_context(&self, user_id: &str, conversation_id: &str) -> Result<MemoryContext>;

    /// Best-effort write after a successful run. Never fails.
    async fn write_success(&self, record: &SuccessRecord);
}

/// Redis-backed memory store.
pub struct RedisMemoryStore {
    client: RedisStreams,
    config: MemoryConfig,
}

impl RedisMemoryStore {
    pub fn new(client: RedisStreams, config: MemoryConfig) -> Self {
        Self { client, config }
    }

    fn user_profile_key(&self, user_id: &str) -> String {
        build_key(&self.config.key_prefix, &["user", user_id, "profile"])
    }

    fn conversation_state_key(&self, conversation_id: &str) -> String {
        build_key(&self.config.key_prefix, &["conv", conversation_id, "state"])
    }

    fn user_events_key(&self, user_id: &str) -> String {
        build_key(&self.config.key_prefix, &["user", user_id, "events"])
    }

    /// Upsert the user profile document; returns the merged document.
    pub async fn upsert_user_profile(&self, user_id: &str, patch: Value) -> Result<Value> {
        let key = self.user_profile_key(user_id);
        let mut con = self.client.connection();

        let existing_raw: Option<String> = con.get(&key).await?;
        let existing = parse_document(existing_raw.as_deref());

        let base = json!({
            "schema": existing
                .get("schema")
                .cloned()
                .unwrap_or_else(|| Value::String(USER_PROFILE_SCHEMA.into())),
            "user_id": user_id,
            "created_at": existing
                .get("created_at")
                .cloned()
                .unwrap_or_else(|| Value::String(Utc::now().to_rfc3339())),
        });
        let merged = merge_document(&existing, &base, &patch);

        let payload = serde_json::to_string(&merged)?;
        debug!(key = %key, ttl_s = self.config.profile_ttl_seconds, "memory write user_profile");
        if self.config.profile_ttl_seconds > 0 {
            let _: () = con
                .set_ex(&key, payload, self.config.profile_ttl_seconds)
                .await?;
        } else {
            let _: () = con.set(&key, payload).await?;
        }
        Ok(merged)
    }

    /// Upsert the conversation state document with TTL; returns the
    /// merged document.
    pub async fn upsert_conversation_state(
        &self,
        conversation_id: &str,
        user_id: &str,
        patch: Value,
    ) -> Result<Value> {
        let key = self.conversation_state_key(conversation_id);
        let mut con = self.client.connection();

        let existing_raw: Option<String> = con.get(&key).await?;
        let existing = parse_document(existing_raw.as_deref());

        let base = json!({
            "schema": existing
                .get("schema")
                .cloned()
                .unwrap_or_else(|| Value::String(CONVERSATION_STATE_SCHEMA.into())),
            "conversation_id": conversation_id,
            "user_id": user_id,
            "created_at": existing
                .get("created_at")
                .cloned()
                .unwrap_or_else(|| Value::String(Utc::now().to_rfc3339())),
        });
        let merged = merge_document(&existing, &base, &patch);

        let ttl = if self.config.conversation_ttl_seconds == 0 {
            12 * 60 * 60
        } else {
            self.config.conversation_ttl_seconds
        };
        debug!(key = %key, ttl_s = ttl, "memory write conversation_state");
        let _: () = con.set_ex(&key, serde_json::to_string(&merged)?, ttl).await?;
        Ok(merged)
    }

    /// Append an event to the user's bounded history (newest first).
    pub async fn append_user_event(&self, user_id: &str, event: &MemoryEvent) -> Result<()> {
        let key = self.user_events_key(user_id);
        let max_items = clamp_events_max_items(self.config.events_max_items);
        let payload = serde_json::to_string(event)?;

        let mut pipe = redis::pipe();
        pipe.lpush(&key, payload).ignore();
        pipe.ltrim(&key, 0, max_items as isize - 1).ignore();
        if self.config.events_ttl_seconds > 0 {
            pipe.expire(&key, self.config.events_ttl_seconds as i64).ignore();
        }
        let mut con = self.client.connection();
        let _: () = pipe.query_async(&mut con).await?;

        debug!(
            key = %key,
            ttl_s = self.config.events_ttl_seconds,
            max_items,
            "memory write user_event"
        );
        Ok(())
    }
}

#[async_trait]
impl Memory for RedisMemoryStore {
    async fn get_context(&self, user_id: &str, conversation_id: &str) -> Result<MemoryContext> {
        let up_key = self.user_profile_key(user_id);
        let cs_key = self.conversation_state_key(conversation_id);
        let ev_key = self.user_events_key(user_id);
        let max_items = clamp_events_max_items(self.config.events_max_items);

        let mut pipe = redis::pipe();
        pipe.get(&up_key);
        pipe.get(&cs_key);
        pipe.lrange(&ev_key, 0, max_items as isize - 1);

        let mut con = self.client.connection();
        let (raw_up, raw_cs, raw_events): (Option<String>, Option<String>, Vec<String>) =
            pipe.query_async(&mut con).await?;

        let user_profile = parse_optional(raw_up.as_deref());
        let conversation_state = parse_optional(raw_cs.as_deref());
        let recent_events: Vec<Value> = raw_events
            .iter()
            .filter_map(|raw| parse_optional(Some(raw)))
            .collect();

        debug!(
            user_profile = user_profile.is_some(),
            conversation_state = conversation_state.is_some(),
            events = recent_events.len(),
            "memory read"
        );

        Ok(MemoryContext {
            user_profile,
            conversation_state,
            recent_events,
        })
    }

    async fn write_success(&self, record: &SuccessRecord) {
        let outcome: Result<()> = async {
            info!(
                user_id = %record.user_id,
                conversation_id = %record.conversation_id,
                detected_language = record.detected_language.as_deref().unwrap_or(""),
                inbound_has_audio = record.inbound_has_audio,
                has_audio_url = record.reply_audio_url.is_some(),
                "memory write (success)"
            );

            self.upsert_conversation_state(
                &record.conversation_id,
                &record.user_id,
                json!({
                    "last_status": "success",
                    "last_original_text": record.original_text,
                    "last_english_text": record.english_text,
                    "last_reply_text": record.reply_text,
                    "last_actions": record.actions,
                    "last_task_instructions": record.task_instructions,
                    "detected_language_last": record.detected_language,
                    "inbound_has_audio_last": record.inbound_has_audio,
                    "reply_audio_url_last": record.reply_audio_url,
                }),
            )
            .await?;

            // Profile stays minimal: "last seen" style facts only.
            let mut profile_patch = Map::new();
            profile_patch.insert("last_seen_at".into(), json!(Utc::now().to_rfc3339()));
            profile_patch.insert(
                "last_detected_language".into(),
                json!(record.detected_language),
            );
            if record.inbound_has_audio {
                profile_patch.insert("reply_in_audio_when_inbound_audio".into(), json!(true));
            }
            self.upsert_user_profile(&record.user_id, Value::Object(profile_patch))
                .await?;

            if record.write_user_event {
                let mut event = MemoryEvent::new(&record.user_id, &record.conversation_id);
                event.original_text = record.original_text.trim().to_string();
                event.english_text = record.english_text.trim().to_string();
                event.reply_text = record.reply_text.clone();
                event.detected_language = record.detected_language.clone();
                event.inbound_has_audio = record.inbound_has_audio;
                event.actions = record.actions.clone();
                event.task_instructions = record.task_instructions.clone();
                event.reply_audio_url = record.reply_audio_url.clone();
                self.append_user_event(&record.user_id, &event).await?;
            } else {
                info!(
                    user_id = %record.user_id,
                    conversation_id = %record.conversation_id,
                    "memory write skipped | kind=user_event | reason=not_grounded"
                );
            }
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            warn!(
                user_id = %record.user_id,
                conversation_id = %record.conversation_id,
                error = %e,
                "memory write skipped due to error"
            );
        }
    }
}

/// Build a memory key: `{prefix}:{part}:{part}...`, with an empty
/// prefix falling back to `mem`.
fn build_key(prefix: &str, parts: &[&str]) -> String {
    let prefix = prefix.trim_matches(':');
    let prefix = if prefix.is_empty() { "mem" } else { prefix };
    let mut key = String::from(prefix);
    for part in parts {
        key.push(':');
        key.push_str(part.trim_matches(':'));
    }
    key
}

/// Parse a stored document, decaying anything unexpected to an empty map.
fn parse_document(raw: Option<&str>) -> Map<String, Value> {
    parse_optional(raw)
        .and_then(|v| match v {
            Value::Object(m) => Some(m),
            _ => None,
        })
        .unwrap_or_default()
}

/// Parse stored JSON, returning only object documents.
fn parse_optional(raw: Option<&str>) -> Option<Value> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v) if v.is_object() => Some(v),
        _ => None,
    }
}

/// Merge order: existing <- base <- patch, then a fresh `updated_at`.
///
/// Base fields (schema, ids, created_at) always win over stale copies in
/// existing; patch wins over both except for the base fields themselves.
fn merge_document(existing: &Map<String, Value>, base: &Value, patch: &Value) -> Value {
    let mut merged = existing.clone();
    if let Value::Object(base_map) = base {
        for (k, v) in base_map {
            merged.insert(k.clone(), v.clone());
        }
    }
    if let Value::Object(patch_map) = patch {
        for (k, v) in patch_map {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged.insert("updated_at".into(), json!(Utc::now().to_rfc3339()));
    Value::Object(merged)
}
