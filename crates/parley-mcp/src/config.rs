//! Tool-server configuration.
//!
//! One JSON file lists every named tool-server:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "notes": {
//!       "transport": "stdio",
//!       "command": "npx",
//!       "args": ["-y", "@example/notes-mcp-server"],
//!       "env": { "NOTES_TOKEN": "${NOTES_ACCESS_TOKEN}" }
//!     },
//!     "remote": {
//!       "transport": "http",
//!       "url": "https://example.com/mcp",
//!       "headers": { "Authorization": "Bearer ${REMOTE_TOKEN}" }
//!     }
//!   }
//! }
//! ```
//!
//! `${ENV_VAR}` placeholders in headers/env values are expanded from the
//! process environment at load time; a missing variable is a startup
//! error. Transport is inferred when absent: `command` means stdio,
//! `url` means http.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{McpError, Result};

/// Transport style for one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

/// Typed representation of a single tool-server configuration.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub name: String,
    pub transport: TransportKind,
    /// Remote endpoint, for http servers.
    pub url: Option<String>,
    /// Launch command, for stdio servers.
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Request headers (http), env-expanded.
    pub headers: HashMap<String, String>,
    /// Child-process environment (stdio), env-expanded.
    pub env: HashMap<String, String>,
}

/// The loaded registry of configured tool-servers.
#[derive(Debug, Clone, Default)]
pub struct McpServersConfig {
    pub servers: Vec<McpServerConfig>,
}

impl McpServersConfig {
    /// Load and validate the config file.
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading tool-server config");
        let raw = std::fs::read_to_string(path).map_err(|e| {
            McpError::Config(format!("config file not found: {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    /// Parse a config document.
    pub fn parse(raw: &str) -> Result<Self> {
        let doc: serde_json::Value = serde_json::from_str(raw)?;
        let servers_raw = doc
            .get("mcpServers")
            .and_then(|v| v.as_object())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| {
                McpError::Config("'mcpServers' must be a non-empty object".into())
            })?;

        let mut servers = Vec::new();
        for (name, cfg) in servers_raw {
            let cfg = cfg.as_object().ok_or_else(|| {
                McpError::Config(format!("server '{name}' must be an object"))
            })?;

            let url = cfg.get("url").and_then(|v| v.as_str()).map(str::to_string);
            let command = cfg
                .get("command")
                .and_then(|v| v.as_str())
                .map(str::to_string);

            let args = match cfg.get("args") {
                None => Vec::new(),
                Some(serde_json::Value::String(s)) => vec![s.clone()],
                Some(serde_json::Value::Array(items)) => items
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => Ok(s.clone()),
                        other => Ok(other.to_string()),
                    })
                    .collect::<Result<Vec<_>>>()?,
                Some(_) => {
                    return Err(McpError::Config(format!(
                        "server '{name}': 'args' must be a list of strings"
                    )));
                }
            };

            let transport = match cfg.get("transport").and_then(|v| v.as_str()) {
                Some("stdio") => TransportKind::Stdio,
                Some("http") | Some("streamable_http") => TransportKind::Http,
                Some(other) => {
                    return Err(McpError::Config(format!(
                        "server '{name}': unknown transport '{other}'"
                    )));
                }
                // Inference: command -> stdio, url -> http.
                None if command.is_some() => TransportKind::Stdio,
                None if url.is_some() => TransportKind::Http,
                None => {
                    return Err(McpError::Config(format!(
                        "server '{name}': provide either 'url' (http) or 'command' (stdio)"
                    )));
                }
            };

            match transport {
                TransportKind::Stdio if command.is_none() => {
                    return Err(McpError::Config(format!(
                        "server '{name}': transport 'stdio' requires 'command'"
                    )));
                }
                TransportKind::Http if url.is_none() => {
                    return Err(McpError::Config(format!(
                        "server '{name}': transport 'http' requires 'url'"
                    )));
                }
                _ => {}
            }

            let headers = expand_env_in_map(cfg.get("headers"), name, "headers")?;
            let env = expand_env_in_map(cfg.get("env"), name, "env")?;

            debug!(
                server = %name,
                transport = ?transport,
                header_keys = ?headers.keys().collect::<Vec<_>>(),
                env_keys = ?env.keys().collect::<Vec<_>>(),
                "tool-server configured"
            );

            servers.push(McpServerConfig {
                name: name.clone(),
                transport,
                url,
                command,
                args,
                headers,
                env,
            });
        }

        // Deterministic order regardless of JSON map iteration.
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        info!(
            servers = ?servers.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "tool-server config loaded"
        );
        Ok(Self { servers })
    }
}

/// Expand `${ENV_VAR}` placeholders in a string.
///
/// A referenced variable that is unset fails the whole load; secrets
/// stay in the environment, not in the config file.
pub fn expand_env_vars(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder: keep literally.
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let var_name = &after[..end];
        match std::env::var(var_name) {
            Ok(v) => out.push_str(&v),
            Err(_) => return Err(McpError::MissingEnvVar(var_name.to_string())),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn expand_env_in_map(
    raw: Option<&serde_json::Value>,
    server: &str,
    field: &str,
) -> Result<HashMap<String, String>> {
    let Some(raw) = raw else {
        return Ok(HashMap::new());
    };
    let obj = raw.as_object().ok_or_else(|| {
        McpError::Config(format!("server '{server}': '{field}' must be an object"))
    })?;

    let mut out = HashMap::new();
    for (k, v) in obj {
        let value = match v {
            serde_json::Value::String(s) => expand_env_vars(s)?,
            other => other.to_string(),
        };
        out.insert(k.clone(), value);
    }
    Ok(out)
}
