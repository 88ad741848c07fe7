//! Tool-server client: handshake, discovery, and tool invocation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{McpError, Result};
use crate::transport::McpTransport;
use crate::types::JsonRpcRequest;

/// Protocol version this client speaks.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// One tool as declared by a server.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's arguments.
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

/// A tool invocation result in one of the shapes servers actually
/// return: plain text, a list of typed content parts, or raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Text(String),
    Parts(Vec<Value>),
    Json(Value),
}

impl ToolResult {
    /// Flatten into a JSON value for the tool layer.
    ///
    /// A single text part collapses to a string (the common case), so
    /// downstream extractors see the same shape the server meant.
    pub fn into_value(self) -> Value {
        match self {
            ToolResult::Text(s) => Value::String(s),
            ToolResult::Parts(parts) => {
                if parts.len() == 1 {
                    if let Some(text) = parts[0]
                        .as_object()
                        .filter(|o| o.get("type").and_then(Value::as_str) == Some("text"))
                        .and_then(|o| o.get("text"))
                        .and_then(Value::as_str)
                    {
                        return Value::String(text.to_string());
                    }
                }
                Value::Array(parts)
            }
            ToolResult::Json(v) => v,
        }
    }
}

/// Client for one configured tool-server.
pub struct McpClient {
    server_name: String,
    transport: Arc<dyn McpTransport>,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(server_name: impl Into<String>, transport: Arc<dyn McpTransport>) -> Self {
        Self {
            server_name: server_name.into(),
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        let response = self.transport.send_request(request).await?;
        if let Some(err) = response.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Perform the initialize handshake.
    pub async fn initialize(&self) -> Result<()> {
        debug!(server = %self.server_name, "initializing tool-server session");
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "parley",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        )
        .await?;
        self.transport
            .send_notification("notifications/initialized", json!({}))
            .await?;
        info!(server = %self.server_name, "tool-server session initialized");
        Ok(())
    }

    /// Discover the server's tools.
    pub async fn list_tools(&self) -> Result<Vec<ToolDeclaration>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| McpError::Transport("tools/list result missing 'tools'".into()))?;
        let declarations: Vec<ToolDeclaration> = serde_json::from_value(tools)?;
        debug!(
            server = %self.server_name,
            tools = declarations.len(),
            "tools discovered"
        );
        Ok(declarations)
    }

    /// Invoke a tool by its server-local name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        debug!(server = %self.server_name, tool = name, "calling tool");
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        // Servers answer with {content: [...]} parts; anything else is
        // passed through as raw JSON.
        match result.get("content") {
            Some(Value::Array(parts)) => Ok(ToolResult::Parts(parts.clone())),
            Some(Value::String(s)) => Ok(ToolResult::Text(s.clone())),
            _ => Ok(ToolResult::Json(result)),
        }
    }
}
