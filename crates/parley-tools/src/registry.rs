//! Tool trait and registry.
//!
//! Defines the contract every tool satisfies and a [`ToolRegistry`] that
//! stores registered tools, emits their schemas in OpenAI function
//! calling format, and dispatches execution requests by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::ToolContext;

/// Error type for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The requested tool was not found in the registry.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The arguments provided to the tool are invalid.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The tool execution failed at runtime.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A file or resource the tool needs was not found.
    #[error("not found: {0}")]
    FileNotFound(String),

    /// The tool execution exceeded the allowed time limit.
    #[error("timeout after {0}s")]
    Timeout(u64),
}

/// A tool that can be invoked by the supervisor or an agent.
///
/// Implementations provide a name, description, optional JSON Schema for
/// arguments, a source-server tag, and an async `execute`. Tools are
/// registered in a [`ToolRegistry`] and dispatched when the LLM emits a
/// tool-use request.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Globally unique tool name (source-prefixed).
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's arguments, when declared.
    fn parameters(&self) -> Option<serde_json::Value>;

    /// The named bucket this tool came from (server name or local tag).
    fn source_server(&self) -> &str;

    /// Execute the tool with the given arguments and request context.
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Registry of available tools, indexed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, source_server = tool.source_server(), "registering tool");
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All registered tool names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool schema in OpenAI function calling format for one tool.
    pub fn schema_for(tool: &dyn Tool) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": tool.name(),
                "description": tool.description(),
                "parameters": tool.parameters().unwrap_or_else(|| serde_json::json!({
                    "type": "object",
                    "properties": {}
                })),
            }
        })
    }

    /// Schemas for a named subset of tools, in the given order.
    ///
    /// Unknown names are a hard error: an agent definition referencing a
    /// tool that does not exist must fail at build time, not be skipped.
    pub fn schemas_for(&self, names: &[String]) -> Result<Vec<serde_json::Value>, ToolError> {
        names
            .iter()
            .map(|name| {
                self.tools
                    .get(name)
                    .map(|t| Self::schema_for(t.as_ref()))
                    .ok_or_else(|| ToolError::NotFound(name.clone()))
            })
            .collect()
    }

    /// Schemas for every registered tool, sorted by name.
    pub fn schemas(&self) -> Vec<serde_json::Value> {
        let mut entries: Vec<(&String, &Arc<dyn Tool>)> = self.tools.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
            .into_iter()
            .map(|(_, t)| Self::schema_for(t.as_ref()))
            .collect()
    }

    /// Execute a tool by name.
    ///
    /// Returns [`ToolError::NotFound`] if no tool with that name is
    /// registered.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        debug!(tool = %name, "executing tool");
        tool.execute(args, ctx).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
