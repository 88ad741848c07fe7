//! Hardening for the document-store create-page tool.
//!
//! Create-page is the call agents get wrong most often; the provider
//! answers each mistake with an HTTP 400. Minimal normalization plus
//! clear preflight failures keep the repair loop short.

use serde_json::Value;

use super::{ToolValidator, semantic_error_payload};

/// Validator for `*create_page` / `*post-page` tools.
pub struct NotesCreatePageValidator;

impl ToolValidator for NotesCreatePageValidator {
    fn applies_to(&self, tool_name: &str) -> bool {
        tool_name.ends_with("create_page") || tool_name.ends_with("post-page")
    }

    fn normalize_args(&self, _tool_name: &str, args: Value) -> (Value, bool) {
        let Value::Object(mut out) = args else {
            return (args, false);
        };
        let mut changed = false;

        // If children accidentally nested under properties, lift it to
        // top level.
        if let Some(Value::Object(props)) = out.get("properties") {
            if props.contains_key("children") && !out.contains_key("children") {
                let mut props = props.clone();
                let children = props.remove("children").unwrap_or(Value::Null);
                out.insert("children".into(), children);
                out.insert("properties".into(), Value::Object(props));
                changed = true;
            }
        }

        // If the model mistakenly sets properties.type = "title", remove it.
        if let Some(Value::Object(props)) = out.get("properties") {
            if props.get("type").and_then(|v| v.as_str()) == Some("title") {
                let mut props = props.clone();
                props.remove("type");
                out.insert("properties".into(), Value::Object(props));
                changed = true;
            }
        }

        (Value::Object(out), changed)
    }

    fn pre_validate(
        &self,
        tool_name: &str,
        args: &Value,
        schema_json: Option<&Value>,
    ) -> Option<String> {
        let props = args.get("properties");
        if !props.is_some_and(Value::is_object) {
            return Some(semantic_error_payload(
                tool_name,
                "create-page requires properties to be an object.",
                schema_json,
            ));
        }

        let title = props.and_then(|p| p.get("title"));
        let title_ok = title.is_some_and(|t| t.is_object() && t.get("title").is_some());
        if !title_ok {
            return Some(semantic_error_payload(
                tool_name,
                "create-page title must be shaped as \
                 {\"properties\":{\"title\":{\"title\":[...rich_text...]}}} \
                 and children must be a top-level field.",
                schema_json,
            ));
        }

        if let Some(children) = args.get("children").and_then(|c| c.as_array()) {
            if children.iter().any(Value::is_string) {
                return Some(semantic_error_payload(
                    tool_name,
                    "create-page children must be an array of block objects (not strings).",
                    schema_json,
                ));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOOL: &str = "notes_create_page";

    fn validator() -> NotesCreatePageValidator {
        NotesCreatePageValidator
    }

    #[test]
    fn applies_to_create_page_variants() {
        let v = validator();
        assert!(v.applies_to("notes_create_page"));
        assert!(v.applies_to("notesApi_API-post-page"));
        assert!(!v.applies_to("notes_search"));
    }

    #[test]
    fn lifts_misplaced_children() {
        let v = validator();
        let args = json!({
            "properties": {
                "title": {"title": []},
                "children": [{"paragraph": {}}]
            }
        });
        let (out, changed) = v.normalize_args(TOOL, args);
        assert!(changed);
        assert!(out["children"].is_array());
        assert!(out["properties"].get("children").is_none());
    }

    #[test]
    fn does_not_clobber_existing_children() {
        let v = validator();
        let args = json!({
            "properties": {
                "title": {"title": []},
                "children": [{"paragraph": {}}]
            },
            "children": [{"heading_1": {}}]
        });
        let (out, changed) = v.normalize_args(TOOL, args);
        assert!(!changed);
        assert_eq!(out["children"][0].get("heading_1").is_some(), true);
    }

    #[test]
    fn strips_stray_title_type() {
        let v = validator();
        let args = json!({
            "properties": {
                "type": "title",
                "title": {"title": []}
            }
        });
        let (out, changed) = v.normalize_args(TOOL, args);
        assert!(changed);
        assert!(out["properties"].get("type").is_none());
    }

    #[test]
    fn non_object_args_untouched() {
        let v = validator();
        let (out, changed) = v.normalize_args(TOOL, json!("weird"));
        assert!(!changed);
        assert_eq!(out, json!("weird"));
    }

    #[test]
    fn preflight_rejects_missing_properties() {
        let v = validator();
        let err = v.pre_validate(TOOL, &json!({}), None).unwrap();
        let payload: Value = serde_json::from_str(&err).unwrap();
        assert_eq!(payload["error_type"], "validation_error");
        assert_eq!(payload["source"], "local_semantic_validation");
        assert!(payload["message"].as_str().unwrap().contains("properties"));
    }

    #[test]
    fn preflight_rejects_bad_title_shape() {
        let v = validator();
        let args = json!({"properties": {"title": "just a string"}});
        let err = v.pre_validate(TOOL, &args, None).unwrap();
        assert!(err.contains("rich_text"));
    }

    #[test]
    fn preflight_rejects_string_children() {
        let v = validator();
        let args = json!({
            "properties": {"title": {"title": []}},
            "children": ["a plain string"]
        });
        let err = v.pre_validate(TOOL, &args, None).unwrap();
        assert!(err.contains("block objects"));
    }

    #[test]
    fn preflight_accepts_valid_shape() {
        let v = validator();
        let args = json!({
            "properties": {"title": {"title": [{"text": {"content": "T"}}]}},
            "children": [{"paragraph": {"rich_text": []}}]
        });
        assert!(v.pre_validate(TOOL, &args, None).is_none());
    }
}
