//! Tool output trimming.
//!
//! Large tool outputs (document-store JSON in particular) can spike
//! prompt tokens by 10-20k per run when fed back to the LLM verbatim.
//! Outputs stay LLM-useful by compressing them into compact summaries
//! with stable schemas, then applying a hard character cap.

use serde_json::{Value, json};

use parley_types::memory::truncate;

use crate::LOCAL_AUDIO_SOURCE;

/// Trimming tunables, taken from settings at bootstrap.
#[derive(Debug, Clone)]
pub struct TrimConfig {
    pub enabled: bool,
    /// Hard character cap; clamped to [500, 20000] at use.
    pub max_chars: usize,
    /// Max items kept in search summaries; clamped to [1, 20] at use.
    pub max_items: usize,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chars: 4000,
            max_items: 5,
        }
    }
}

/// Trim a tool result where it pays off.
///
/// Local tools are never trimmed: their outputs are small and the worker
/// consumes some of them structurally (TTS file paths). Remote outputs
/// are unwrapped from the transport shapes (`[{type:"text",text}]`,
/// JSON-in-string), summarized when they look like search results or a
/// single document, and hard-capped otherwise.
pub fn maybe_trim_tool_output(
    tool_name: &str,
    source_server: &str,
    args: Option<&Value>,
    result: Value,
    config: &TrimConfig,
) -> Value {
    if !config.enabled || source_server == LOCAL_AUDIO_SOURCE {
        return result;
    }

    let max_chars = config.max_chars.clamp(500, 20_000);

    let raw_obj = match unwrap_payload(&result) {
        Some(obj) => obj,
        None => return result,
    };

    if let Some(results) = raw_obj.get("results").and_then(|v| v.as_array()) {
        let query = args
            .and_then(|a| a.get("query"))
            .and_then(|q| q.as_str())
            .map(str::to_string);
        let summary = summarize_search(&raw_obj, results, query, config.max_items.clamp(1, 20));
        return Value::String(truncate(&summary.to_string(), max_chars));
    }

    if looks_like_document(&raw_obj) {
        let summary = summarize_document(&raw_obj);
        return Value::String(truncate(&summary.to_string(), max_chars));
    }

    // Anything else: hard cap when it is large.
    let dumped = raw_obj.to_string();
    if dumped.len() > max_chars {
        tracing::debug!(tool = tool_name, chars = dumped.len(), "tool output capped");
        return Value::String(truncate(&dumped, max_chars));
    }
    result
}

/// Unwrap the transport shapes remote tools return.
fn unwrap_payload(result: &Value) -> Option<Value> {
    match result {
        Value::Object(_) => Some(result.clone()),
        Value::String(s) => serde_json::from_str::<Value>(s).ok().filter(Value::is_object),
        Value::Array(items) => {
            let first = items.first()?;
            let text = first
                .as_object()
                .filter(|o| o.get("type").and_then(|t| t.as_str()) == Some("text"))?
                .get("text")?
                .as_str()?;
            serde_json::from_str::<Value>(text).ok().filter(Value::is_object)
        }
        _ => None,
    }
}

fn looks_like_document(obj: &Value) -> bool {
    obj.get("id").is_some() && (obj.get("url").is_some() || obj.get("properties").is_some())
}

fn summarize_search(
    payload: &Value,
    results: &[Value],
    query: Option<String>,
    max_items: usize,
) -> Value {
    let out_results: Vec<Value> = results
        .iter()
        .take(max_items)
        .filter(|item| item.is_object())
        .map(|item| {
            json!({
                "id": item.get("id"),
                "title": extract_title(item),
                "url": item.get("url"),
                "created_time": item.get("created_time"),
                "last_edited_time": item.get("last_edited_time"),
                "parent": item.get("parent"),
                "object": item.get("object"),
            })
        })
        .collect();

    json!({
        "schema": "search_summary_v1",
        "query": query,
        "count": out_results.len(),
        "results": out_results,
        "has_more": payload.get("has_more"),
        "next_cursor": payload.get("next_cursor"),
    })
}

fn summarize_document(payload: &Value) -> Value {
    json!({
        "schema": "document_summary_v1",
        "id": payload.get("id"),
        "title": extract_title(payload),
        "url": payload.get("url"),
        "created_time": payload.get("created_time"),
        "last_edited_time": payload.get("last_edited_time"),
        "parent": payload.get("parent"),
        "object": payload.get("object"),
    })
}

/// Pull a human title out of a document-store page.
///
/// Prefers `properties.title.title[].plain_text` (falling back to
/// `text.content` parts), then a top-level `title` string, then the id.
fn extract_title(page: &Value) -> String {
    if let Some(parts) = page
        .get("properties")
        .and_then(|p| p.get("title"))
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("title"))
        .and_then(|t| t.get("title"))
        .and_then(|t| t.as_array())
    {
        let plain: Vec<String> = parts
            .iter()
            .filter_map(|p| {
                p.get("plain_text")
                    .and_then(|t| t.as_str())
                    .or_else(|| {
                        p.get("text")
                            .and_then(|t| t.get("content"))
                            .and_then(|c| c.as_str())
                    })
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .collect();
        if !plain.is_empty() {
            return plain.join(" ");
        }
    }

    if let Some(title) = page.get("title").and_then(|t| t.as_str()) {
        if !title.trim().is_empty() {
            return title.trim().to_string();
        }
    }

    page.get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: &str, title: &str) -> Value {
        json!({
            "object": "page",
            "id": id,
            "url": format!("https://docs.example.com/{id}"),
            "created_time": "2026-01-01T00:00:00Z",
            "last_edited_time": "2026-01-02T00:00:00Z",
            "parent": {"page_id": "root"},
            "properties": {
                "title": {
                    "type": "title",
                    "title": [{"plain_text": title}]
                }
            }
        })
    }

    #[test]
    fn search_results_are_summarized() {
        let payload = json!({
            "results": [page("p1", "Groceries"), page("p2", "Trip plan")],
            "has_more": false,
            "next_cursor": null
        });
        let out = maybe_trim_tool_output(
            "notes_search",
            "notes",
            Some(&json!({"query": "groceries"})),
            payload,
            &TrimConfig::default(),
        );
        let summary: Value = serde_json::from_str(out.as_str().unwrap()).unwrap();
        assert_eq!(summary["schema"], "search_summary_v1");
        assert_eq!(summary["query"], "groceries");
        assert_eq!(summary["count"], 2);
        assert_eq!(summary["results"][0]["title"], "Groceries");
    }

    #[test]
    fn search_summary_caps_items() {
        let results: Vec<Value> = (0..10).map(|i| page(&format!("p{i}"), "x")).collect();
        let payload = json!({"results": results});
        let out = maybe_trim_tool_output(
            "notes_search",
            "notes",
            None,
            payload,
            &TrimConfig {
                max_items: 3,
                ..TrimConfig::default()
            },
        );
        let summary: Value = serde_json::from_str(out.as_str().unwrap()).unwrap();
        assert_eq!(summary["count"], 3);
    }

    #[test]
    fn document_is_summarized() {
        let out = maybe_trim_tool_output(
            "notes_retrieve_page",
            "notes",
            None,
            page("p9", "Reading list"),
            &TrimConfig::default(),
        );
        let summary: Value = serde_json::from_str(out.as_str().unwrap()).unwrap();
        assert_eq!(summary["schema"], "document_summary_v1");
        assert_eq!(summary["title"], "Reading list");
        assert_eq!(summary["id"], "p9");
    }

    #[test]
    fn parts_wrapper_is_unwrapped() {
        let inner = json!({"results": [page("p1", "A")]}).to_string();
        let wrapped = json!([{"type": "text", "text": inner}]);
        let out = maybe_trim_tool_output(
            "notes_search",
            "notes",
            None,
            wrapped,
            &TrimConfig::default(),
        );
        let summary: Value = serde_json::from_str(out.as_str().unwrap()).unwrap();
        assert_eq!(summary["schema"], "search_summary_v1");
    }

    #[test]
    fn oversized_generic_output_is_capped() {
        let big = json!({"blob": "y".repeat(5000)});
        let out = maybe_trim_tool_output(
            "notes_export",
            "notes",
            None,
            big,
            &TrimConfig {
                max_chars: 600,
                ..TrimConfig::default()
            },
        );
        let text = out.as_str().unwrap();
        assert_eq!(text.chars().count(), 600);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn small_generic_output_passes_through() {
        let small = json!({"ok": true});
        let out = maybe_trim_tool_output(
            "notes_ping",
            "notes",
            None,
            small.clone(),
            &TrimConfig::default(),
        );
        assert_eq!(out, small);
    }

    #[test]
    fn local_audio_is_never_trimmed() {
        let payload = json!({"file_path": "/tmp/x.mp3", "format": "mp3", "blob": "z".repeat(9000)});
        let out = maybe_trim_tool_output(
            "local_audio_text_to_speech",
            LOCAL_AUDIO_SOURCE,
            None,
            payload.clone(),
            &TrimConfig {
                max_chars: 500,
                ..TrimConfig::default()
            },
        );
        assert_eq!(out, payload);
    }

    #[test]
    fn disabled_trimming_passes_through() {
        let payload = json!({"results": [page("p1", "A")]});
        let out = maybe_trim_tool_output(
            "notes_search",
            "notes",
            None,
            payload.clone(),
            &TrimConfig {
                enabled: false,
                ..TrimConfig::default()
            },
        );
        assert_eq!(out, payload);
    }

    #[test]
    fn title_fallbacks() {
        assert_eq!(extract_title(&json!({"title": "Plain"})), "Plain");
        assert_eq!(extract_title(&json!({"id": "abc"})), "abc");
        let nested = json!({
            "properties": {"title": {"type": "title", "title": [
                {"text": {"content": "From"}},
                {"text": {"content": "content"}}
            ]}}
        });
        assert_eq!(extract_title(&nested), "From content");
    }

    #[test]
    fn non_object_results_pass_through() {
        let out = maybe_trim_tool_output(
            "notes_count",
            "notes",
            None,
            json!(42),
            &TrimConfig::default(),
        );
        assert_eq!(out, json!(42));
    }
}
