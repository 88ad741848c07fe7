//! Adapts discovered tool-server tools to the workspace tool contract.
//!
//! Discovery connects each configured server, lists its tools, applies
//! the per-server blacklist, and yields [`McpTool`]s whose names are
//! prefixed with the server name (`{server}_{tool}`) so tools never
//! collide across servers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use parley_tools::{Tool, ToolContext, ToolError};
use parley_types::ToolRecord;

use crate::client::McpClient;
use crate::config::{McpServersConfig, TransportKind};
use crate::error::Result;
use crate::transport::{HttpTransport, McpTransport, StdioTransport};

/// Build the globally unique name for a server-local tool.
pub fn prefixed_name(server: &str, tool: &str) -> String {
    format!("{server}_{tool}")
}

/// A remote tool bound to its server's client.
pub struct McpTool {
    client: Arc<McpClient>,
    name: String,
    remote_name: String,
    description: String,
    schema: Option<Value>,
}

impl McpTool {
    pub fn new(
        client: Arc<McpClient>,
        remote_name: impl Into<String>,
        description: impl Into<String>,
        schema: Option<Value>,
    ) -> Self {
        let remote_name = remote_name.into();
        let name = prefixed_name(client.server_name(), &remote_name);
        Self {
            client,
            name,
            remote_name,
            description: description.into(),
            schema,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Option<Value> {
        self.schema.clone()
    }

    fn source_server(&self) -> &str {
        self.client.server_name()
    }

    async fn execute(
        &self,
        args: Value,
        _ctx: &ToolContext,
    ) -> std::result::Result<Value, ToolError> {
        let result = self
            .client
            .call_tool(&self.remote_name, args)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(result.into_value())
    }
}

/// One discovery result: the executable tool plus its composer record.
pub struct DiscoveredTool {
    pub tool: Arc<dyn Tool>,
    pub record: ToolRecord,
}

/// Connect every configured server and discover its tools.
///
/// Blacklisted tools are dropped at discovery and never assigned. A
/// server that fails to connect or list is logged and skipped rather
/// than failing the boot; the rest of the fleet still comes up.
pub async fn discover_tools(
    config: &McpServersConfig,
    blacklist_by_server: &HashMap<String, HashSet<String>>,
) -> Result<Vec<DiscoveredTool>> {
    let mut discovered = Vec::new();

    for server in &config.servers {
        let transport: Arc<dyn McpTransport> = match server.transport {
            TransportKind::Stdio => {
                let command = server.command.as_deref().unwrap_or_default();
                match StdioTransport::new(command, &server.args, &server.env).await {
                    Ok(t) => Arc::new(t),
                    Err(e) => {
                        warn!(server = %server.name, error = %e, "tool-server spawn failed, skipping");
                        continue;
                    }
                }
            }
            TransportKind::Http => {
                let url = server.url.clone().unwrap_or_default();
                Arc::new(HttpTransport::new(url, server.headers.clone()))
            }
        };

        let client = Arc::new(McpClient::new(&server.name, transport));
        if let Err(e) = client.initialize().await {
            warn!(server = %server.name, error = %e, "tool-server initialize failed, skipping");
            continue;
        }

        let declarations = match client.list_tools().await {
            Ok(d) => d,
            Err(e) => {
                warn!(server = %server.name, error = %e, "tool discovery failed, skipping");
                continue;
            }
        };

        let blacklist = blacklist_by_server
            .get(&server.name)
            .cloned()
            .unwrap_or_default();

        let mut kept = 0usize;
        let mut dropped = 0usize;
        for decl in declarations {
            if blacklist.contains(&decl.name) {
                dropped += 1;
                continue;
            }
            let tool = McpTool::new(
                client.clone(),
                &decl.name,
                &decl.description,
                decl.input_schema.clone(),
            );
            let record = ToolRecord {
                name: tool.name.clone(),
                description: decl.description.clone(),
                args_schema: decl.input_schema,
                source_server: server.name.clone(),
            };
            debug!(server = %server.name, tool = %record.name, "tool discovered");
            discovered.push(DiscoveredTool {
                tool: Arc::new(tool),
                record,
            });
            kept += 1;
        }
        if dropped > 0 {
            info!(server = %server.name, kept, dropped, "tool blacklist applied");
        }
    }

    info!(tools = discovered.len(), "tool discovery complete");
    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;

    #[test]
    fn prefixing() {
        assert_eq!(prefixed_name("notes", "search"), "notes_search");
    }

    #[tokio::test]
    async fn mcp_tool_executes_via_client() {
        let transport = Arc::new(MockTransport::new(vec![MockTransport::ok(
            1,
            json!({"content": [{"type": "text", "text": "{\"id\":\"p1\"}"}]}),
        )]));
        let client = Arc::new(McpClient::new("notes", transport.clone() as Arc<dyn McpTransport>));
        let tool = McpTool::new(client, "search", "Search pages", None);

        assert_eq!(tool.name(), "notes_search");
        assert_eq!(tool.source_server(), "notes");

        let out = tool
            .execute(json!({"query": "x"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, Value::String("{\"id\":\"p1\"}".into()));

        // The server sees the unprefixed name.
        let requests = transport.requests();
        assert_eq!(requests[0].params["name"], "search");
    }

    #[tokio::test]
    async fn mcp_tool_rpc_failure_is_execution_error() {
        let transport = Arc::new(MockTransport::new(vec![]));
        let client = Arc::new(McpClient::new("notes", transport as Arc<dyn McpTransport>));
        let tool = McpTool::new(client, "search", "Search", None);
        let err = tool
            .execute(json!({}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }
}
