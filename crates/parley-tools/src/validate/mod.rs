//! Tool validation wrapper.
//!
//! [`ValidatingTool`] wraps an inner [`Tool`] transparently (same name,
//! description, schema, source server) and hardens every call:
//! per-tool argument normalization, semantic preflight, JSON-schema
//! validation, provider-error normalization, output trimming, and
//! grounding-event recording.
//!
//! Validation failures are returned to the LLM as stable
//! `error_type=validation_error` JSON payloads rather than errors, so
//! agents can repair their arguments and retry (once).

mod notes_create_page;
mod provider_error;

pub use provider_error::normalize_provider_validation_error;

use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::context::ToolContext;
use crate::registry::{Tool, ToolError};
use crate::trim::{TrimConfig, maybe_trim_tool_output};

use notes_create_page::NotesCreatePageValidator;

/// Tool-specific validator/normalizer.
///
/// `normalize_args` rewrites common structural mistakes into canonical
/// shapes; it must be conservative. `pre_validate` fails fast with a
/// canonical `validation_error` payload before any call is made.
pub trait ToolValidator: Send + Sync {
    /// Whether this validator handles the named tool.
    fn applies_to(&self, tool_name: &str) -> bool;

    /// Rewrite common mistakes; returns the (possibly new) args and
    /// whether anything changed.
    fn normalize_args(&self, tool_name: &str, args: Value) -> (Value, bool) {
        let _ = tool_name;
        (args, false)
    }

    /// Reject semantically invalid args with a canonical error payload.
    fn pre_validate(
        &self,
        tool_name: &str,
        args: &Value,
        schema_json: Option<&Value>,
    ) -> Option<String> {
        let _ = (tool_name, args, schema_json);
        None
    }
}

struct NoopValidator;

impl ToolValidator for NoopValidator {
    fn applies_to(&self, _tool_name: &str) -> bool {
        true
    }
}

static NOTES_CREATE_PAGE: NotesCreatePageValidator = NotesCreatePageValidator;
static NOOP: NoopValidator = NoopValidator;

/// Find the validator responsible for a tool.
fn get_validator(tool_name: &str) -> &'static dyn ToolValidator {
    if NOTES_CREATE_PAGE.applies_to(tool_name) {
        &NOTES_CREATE_PAGE
    } else {
        &NOOP
    }
}

/// Canonical payload for a semantic preflight failure.
pub(crate) fn semantic_error_payload(
    tool_name: &str,
    message: &str,
    schema_json: Option<&Value>,
) -> String {
    json!({
        "error_type": "validation_error",
        "source": "local_semantic_validation",
        "tool": tool_name,
        "message": message,
        "schema": schema_json,
    })
    .to_string()
}

/// Transparent hardening wrapper around an existing tool.
pub struct ValidatingTool {
    inner: Arc<dyn Tool>,
    schema: Option<Value>,
    compiled: Option<JSONSchema>,
    trim: TrimConfig,
}

impl ValidatingTool {
    /// Wrap a tool, compiling its argument schema when it declares one.
    pub fn new(inner: Arc<dyn Tool>, trim: TrimConfig) -> Self {
        let schema = inner.parameters();
        let compiled = schema.as_ref().and_then(|s| {
            match JSONSchema::options().with_draft(Draft::Draft7).compile(s) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    warn!(
                        tool = inner.name(),
                        error = %e,
                        "tool args schema failed to compile, schema validation disabled"
                    );
                    None
                }
            }
        });
        Self {
            inner,
            schema,
            compiled,
            trim,
        }
    }

    /// Wrap a tool in an `Arc`, convenience for registration.
    pub fn wrap(inner: Arc<dyn Tool>, trim: TrimConfig) -> Arc<dyn Tool> {
        Arc::new(Self::new(inner, trim))
    }

    fn schema_validation_error(&self, args: &Value, errors: Vec<String>) -> String {
        json!({
            "error_type": "validation_error",
            "source": "local_schema_validation",
            "tool": self.inner.name(),
            "message": "Tool arguments failed schema validation. Fix args and retry once.",
            "input_args": args,
            "validation_errors": errors,
            "schema": self.schema,
        })
        .to_string()
    }

    /// Run preflight checks; `Some` is the error payload to return.
    fn validate_or_none(&self, args: &Value) -> Option<String> {
        let validator = get_validator(self.inner.name());
        if let Some(err) =
            validator.pre_validate(self.inner.name(), args, self.schema.as_ref())
        {
            warn!(tool = self.inner.name(), "tool semantic validation failed");
            return Some(err);
        }

        let Some(compiled) = &self.compiled else {
            debug!(tool = self.inner.name(), "schema validation skipped (no args_schema)");
            return None;
        };

        if let Err(errors) = compiled.validate(args) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect();
            warn!(
                tool = self.inner.name(),
                errors = messages.len(),
                "tool schema validation failed"
            );
            return Some(self.schema_validation_error(args, messages));
        }
        debug!(tool = self.inner.name(), "tool schema validation ok");
        None
    }
}

#[async_trait]
impl Tool for ValidatingTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters(&self) -> Option<Value> {
        self.schema.clone()
    }

    fn source_server(&self) -> &str {
        self.inner.source_server()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let validator = get_validator(self.inner.name());
        let (args, changed) = validator.normalize_args(self.inner.name(), args);
        if changed {
            warn!(tool = self.inner.name(), "tool args normalized");
        }

        if let Some(err) = self.validate_or_none(&args) {
            let result = Value::String(err);
            ctx.grounding.record_result(self.inner.name(), &result);
            return Ok(result);
        }

        let result = match self.inner.execute(args.clone(), ctx).await {
            Ok(value) => value,
            Err(e) => {
                // Failures are fed back to the LLM as error-like output
                // instead of aborting the supervisor run.
                warn!(tool = self.inner.name(), error = %e, "tool execution failed");
                let result = json!({ "error": e.to_string(), "tool": self.inner.name() });
                ctx.grounding.record_result(self.inner.name(), &result);
                return Ok(result);
            }
        };

        if let Some(normalized) =
            normalize_provider_validation_error(self.inner.name(), &result)
        {
            let result = Value::String(normalized);
            ctx.grounding.record_result(self.inner.name(), &result);
            return Ok(result);
        }

        let result = maybe_trim_tool_output(
            self.inner.name(),
            self.inner.source_server(),
            Some(&args),
            result,
            &self.trim,
        );
        ctx.grounding.record_result(self.inner.name(), &result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ToolContext;

    /// Inner tool that records nothing and succeeds.
    struct CreatePageTool;

    #[async_trait]
    impl Tool for CreatePageTool {
        fn name(&self) -> &str {
            "notes_create_page"
        }

        fn description(&self) -> &str {
            "Create a page"
        }

        fn parameters(&self) -> Option<Value> {
            Some(json!({
                "type": "object",
                "properties": {
                    "properties": { "type": "object" },
                    "children": { "type": "array" }
                },
                "required": ["properties"]
            }))
        }

        fn source_server(&self) -> &str {
            "notes"
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(json!({"id": "page-1", "url": "https://docs.example.com/page-1"}))
        }
    }

    /// Inner tool that always fails.
    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "notes_failing"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameters(&self) -> Option<Value> {
            None
        }

        fn source_server(&self) -> &str {
            "notes"
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Err(ToolError::ExecutionFailed("upstream 500".into()))
        }
    }

    fn valid_create_args() -> Value {
        json!({
            "properties": {
                "title": { "title": [{"text": {"content": "Groceries"}}] }
            },
            "children": [{"paragraph": {"rich_text": []}}]
        })
    }

    #[tokio::test]
    async fn valid_call_passes_and_grounds() {
        let tool = ValidatingTool::new(Arc::new(CreatePageTool), TrimConfig::default());
        let ctx = ToolContext::default();
        let result = tool.execute(valid_create_args(), &ctx).await.unwrap();
        // Document summary trim kicks in for the remote source.
        let summary: Value = serde_json::from_str(result.as_str().unwrap()).unwrap();
        assert_eq!(summary["schema"], "document_summary_v1");

        let events = ctx.grounding.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].ok);
        assert!(ctx.grounding.any_grounded_success(false));
    }

    #[tokio::test]
    async fn schema_violation_returns_canonical_payload() {
        let tool = ValidatingTool::new(Arc::new(CreatePageTool), TrimConfig::default());
        let ctx = ToolContext::default();
        // "properties" is required but missing entirely -> semantic check
        // fires first with its own canonical payload.
        let result = tool.execute(json!({}), &ctx).await.unwrap();
        let payload: Value = serde_json::from_str(result.as_str().unwrap()).unwrap();
        assert_eq!(payload["error_type"], "validation_error");
        assert_eq!(payload["tool"], "notes_create_page");
        assert!(!ctx.grounding.any_grounded_success(false));
    }

    #[tokio::test]
    async fn schema_violation_lists_errors() {
        let tool = ValidatingTool::new(Arc::new(CreatePageTool), TrimConfig::default());
        let ctx = ToolContext::default();
        // Semantically fine shape but schema type mismatch on children.
        let args = json!({
            "properties": {
                "title": { "title": [] }
            },
            "children": "not-an-array"
        });
        let result = tool.execute(args, &ctx).await.unwrap();
        let payload: Value = serde_json::from_str(result.as_str().unwrap()).unwrap();
        assert_eq!(payload["source"], "local_schema_validation");
        assert!(
            payload["validation_errors"]
                .as_array()
                .is_some_and(|v| !v.is_empty())
        );
        assert!(payload["schema"].is_object());
        assert!(payload["input_args"].is_object());
    }

    #[tokio::test]
    async fn execution_failure_becomes_error_payload() {
        let tool = ValidatingTool::new(Arc::new(FailingTool), TrimConfig::default());
        let ctx = ToolContext::default();
        let result = tool.execute(json!({}), &ctx).await.unwrap();
        assert!(result["error"].as_str().unwrap().contains("upstream 500"));
        let events = ctx.grounding.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].ok);
    }

    #[tokio::test]
    async fn wrapper_preserves_identity() {
        let tool = ValidatingTool::new(Arc::new(CreatePageTool), TrimConfig::default());
        assert_eq!(tool.name(), "notes_create_page");
        assert_eq!(tool.source_server(), "notes");
        assert!(tool.parameters().is_some());
    }

    #[tokio::test]
    async fn normalization_lifts_children_before_validation() {
        let tool = ValidatingTool::new(Arc::new(CreatePageTool), TrimConfig::default());
        let ctx = ToolContext::default();
        // children misplaced under properties: the normalizer lifts it to
        // top level, after which both checks pass.
        let args = json!({
            "properties": {
                "title": { "title": [{"text": {"content": "T"}}] },
                "children": [{"paragraph": {}}]
            }
        });
        let result = tool.execute(args, &ctx).await.unwrap();
        let payload: Value = serde_json::from_str(result.as_str().unwrap()).unwrap();
        assert_eq!(payload["schema"], "document_summary_v1");
        assert!(ctx.grounding.any_grounded_success(false));
    }
}
