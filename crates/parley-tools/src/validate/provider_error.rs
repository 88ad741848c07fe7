//! Provider validation-error normalization.
//!
//! Remote tool servers pass provider HTTP errors through as tool output.
//! When the payload is a validation error (`status=400,
//! code=validation_error`), it is rewritten into the stable
//! `error_type=validation_error` contract so agents can reliably repair
//! or stop, with a repeat count tracked per `(tool, message)` inside a
//! 60-second window.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::warn;

/// Window within which identical errors count as repeats.
const REPEAT_WINDOW: Duration = Duration::from_secs(60);

/// Keyed by (tool_name, message) -> (repeat_count, last_seen).
static REPEATS: LazyLock<Mutex<HashMap<(String, String), (u32, Instant)>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Best-effort extraction of JSON-ish text from remote tool returns.
///
/// Observed shapes: `[{"type":"text","text":"{...json...}"}]`, plain
/// strings, and already-decoded objects.
fn extract_json_object(result: &Value) -> Option<Value> {
    match result {
        Value::Object(_) => Some(result.clone()),
        Value::String(s) => serde_json::from_str::<Value>(s).ok().filter(Value::is_object),
        Value::Array(items) => {
            let text = items
                .first()?
                .as_object()?
                .get("text")?
                .as_str()?;
            serde_json::from_str::<Value>(text).ok().filter(Value::is_object)
        }
        _ => None,
    }
}

fn bump_repeat_count(tool_name: &str, message: &str) -> u32 {
    let key = (tool_name.to_string(), message.to_string());
    let now = Instant::now();
    let mut repeats = REPEATS.lock().expect("repeat counter poisoned");
    let count = match repeats.get(&key) {
        Some((count, last_seen)) if now.duration_since(*last_seen) <= REPEAT_WINDOW => count + 1,
        _ => 1,
    };
    repeats.insert(key, (count, now));
    count
}

/// Detect a provider validation-error payload and rewrite it into the
/// stable contract. Returns `None` when the result is anything else.
pub fn normalize_provider_validation_error(tool_name: &str, result: &Value) -> Option<String> {
    let data = extract_json_object(result)?;
    if data.get("status").and_then(Value::as_i64) != Some(400)
        || data.get("code").and_then(Value::as_str) != Some("validation_error")
    {
        return None;
    }

    let message = data
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let repeat_count = bump_repeat_count(tool_name, &message);

    warn!(
        tool = tool_name,
        repeat_count, "normalized provider validation_error"
    );

    let payload = json!({
        "error_type": "validation_error",
        "source": "provider_validation",
        "tool": tool_name,
        "message": message,
        "request_id": data.get("request_id"),
        "repeat_count": repeat_count,
        "retry_policy": "retry_once_then_stop",
        "guidance": "Fix the request payload to match the provider's documented shapes. \
                     If repeat_count>=2, stop retrying and ask for clarification.",
        "raw": data,
    });
    Some(payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_error(message: &str) -> Value {
        json!({
            "status": 400,
            "code": "validation_error",
            "message": message,
            "request_id": "req-1"
        })
    }

    #[test]
    fn normalizes_object_payload() {
        let out =
            normalize_provider_validation_error("t_norm_obj", &provider_error("bad title"))
                .unwrap();
        let payload: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(payload["error_type"], "validation_error");
        assert_eq!(payload["source"], "provider_validation");
        assert_eq!(payload["tool"], "t_norm_obj");
        assert_eq!(payload["message"], "bad title");
        assert_eq!(payload["repeat_count"], 1);
        assert_eq!(payload["retry_policy"], "retry_once_then_stop");
        assert_eq!(payload["raw"]["request_id"], "req-1");
    }

    #[test]
    fn normalizes_parts_wrapped_payload() {
        let wrapped = json!([{
            "type": "text",
            "text": provider_error("bad children").to_string()
        }]);
        let out = normalize_provider_validation_error("t_norm_parts", &wrapped).unwrap();
        assert!(out.contains("bad children"));
    }

    #[test]
    fn normalizes_string_payload() {
        let raw = provider_error("bad parent").to_string();
        let out =
            normalize_provider_validation_error("t_norm_str", &Value::String(raw)).unwrap();
        assert!(out.contains("bad parent"));
    }

    #[test]
    fn ignores_non_validation_errors() {
        assert!(normalize_provider_validation_error(
            "t_ignore",
            &json!({"status": 500, "code": "server_error"})
        )
        .is_none());
        assert!(normalize_provider_validation_error(
            "t_ignore",
            &json!({"status": 400, "code": "unauthorized"})
        )
        .is_none());
        assert!(normalize_provider_validation_error("t_ignore", &json!("plain")).is_none());
        assert!(normalize_provider_validation_error("t_ignore", &json!({"ok": true})).is_none());
    }

    #[test]
    fn repeat_count_increments_within_window() {
        let err = provider_error("same message");
        let first = normalize_provider_validation_error("t_repeat_unique", &err).unwrap();
        let second = normalize_provider_validation_error("t_repeat_unique", &err).unwrap();
        let p1: Value = serde_json::from_str(&first).unwrap();
        let p2: Value = serde_json::from_str(&second).unwrap();
        assert_eq!(p1["repeat_count"], 1);
        assert_eq!(p2["repeat_count"], 2);
    }

    #[test]
    fn different_messages_count_separately() {
        let a = normalize_provider_validation_error("t_msgs", &provider_error("msg A")).unwrap();
        let b = normalize_provider_validation_error("t_msgs", &provider_error("msg B")).unwrap();
        let pa: Value = serde_json::from_str(&a).unwrap();
        let pb: Value = serde_json::from_str(&b).unwrap();
        assert_eq!(pa["repeat_count"], 1);
        assert_eq!(pb["repeat_count"], 1);
    }
}
