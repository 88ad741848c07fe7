//! Tool-server client.
//!
//! Loads named tool-server definitions from one JSON config file
//! (stdio servers launched as child processes, HTTP servers reached by
//! POST), expands `${ENV_VAR}` placeholders at load time, discovers each
//! server's tools over JSON-RPC, and adapts them into the workspace
//! [`parley_tools::Tool`] contract with source-prefixed names.
//!
//! Discovery runs once per process boot; the bootstrap holds onto the
//! results.

pub mod adapter;
pub mod client;
pub mod config;
pub mod error;
pub mod transport;
pub mod types;

pub use adapter::{DiscoveredTool, McpTool, discover_tools};
pub use client::{McpClient, ToolDeclaration, ToolResult};
pub use config::{McpServerConfig, McpServersConfig};
pub use error::{McpError, Result};
pub use transport::{HttpTransport, McpTransport, StdioTransport};
