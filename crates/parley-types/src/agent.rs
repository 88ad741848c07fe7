//! Tool records, agent definitions, server rules, and policy packs.
//!
//! A [`ToolRecord`] describes one discovered tool (remote or local). The
//! agent composer turns the full set of records into an
//! [`AgentDefinitions`] document, constrained by optional per-server
//! [`ServerRules`] and adjusted by [`PolicyPack`]s.

use serde::{Deserialize, Serialize};

/// A discovered tool, as seen by the composer.
///
/// `name` is globally unique: discovery prefixes every tool with its
/// source server (`notes_search`, `local_audio_text_to_speech`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments, when the server declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_schema: Option<serde_json::Value>,
    /// The named bucket this tool came from (server name or local tag).
    pub source_server: String,
}

/// A single composed agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Stable snake_case identifier, prefixed by the source server.
    pub name: String,
    /// What this agent handles, in at most two sentences.
    pub responsibility: String,
    /// Rendered system message (policy packs applied, placeholders
    /// resolved).
    pub system_message: String,
    /// Names of the tools assigned to this agent; never empty.
    pub tools: Vec<String>,
    /// The source server this agent maps to.
    pub source_server: String,
}

/// The composer's output document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentDefinitions {
    pub agents: Vec<AgentDefinition>,
}

impl AgentDefinitions {
    /// JSON Schema for structured-output categorization calls.
    pub fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agents": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {
                                "type": "string",
                                "description": "Stable snake_case agent identifier prefixed by source_server."
                            },
                            "responsibility": {
                                "type": "string",
                                "description": "What this agent handles, at most two sentences."
                            },
                            "system_message": {
                                "type": "string",
                                "description": "Second-person system message for the agent."
                            },
                            "tools": {
                                "type": "array",
                                "items": { "type": "string" },
                                "minItems": 1,
                                "description": "Tool names assigned to this agent."
                            },
                            "source_server": {
                                "type": "string",
                                "description": "The server these tools came from."
                            }
                        },
                        "required": ["name", "responsibility", "system_message", "tools", "source_server"]
                    }
                }
            },
            "required": ["agents"]
        })
    }
}

/// An agent that a server's rules demand verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredAgent {
    pub name: String,
    pub responsibility: String,
    pub system_message: String,
    pub tools: Vec<String>,
}

/// Optional per-server rules consulted during composition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerRules {
    /// Agents that must be created exactly as listed.
    #[serde(default)]
    pub desired_agents: Vec<DesiredAgent>,

    /// Tools dropped at discovery and never assigned.
    #[serde(default)]
    pub blacklisted_tools: Vec<String>,

    /// Free-form guidance included in the categorization prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The on-disk rules document: `{"servers": {"<name>": {...}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRules {
    #[serde(default)]
    pub servers: std::collections::HashMap<String, ServerRules>,
}

/// Which source servers a policy pack applies to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyMatch {
    /// Server names, or `"*"` for all.
    #[serde(default)]
    pub source_servers: Vec<String>,
}

/// System-message adjustments injected by a policy pack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyInject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepend_system_message: Option<String>,
    #[serde(default)]
    pub append_system_message: Vec<String>,
}

/// A rule document that adjusts generated agent system messages for
/// matching source servers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyPack {
    pub id: String,
    #[serde(default)]
    pub r#match: PolicyMatch,
    #[serde(default)]
    pub inject: PolicyInject,
}

impl PolicyPack {
    /// Whether this pack applies to the given source server.
    pub fn matches(&self, source_server: &str) -> bool {
        self.r#match
            .source_servers
            .iter()
            .any(|s| s == "*" || s == source_server)
    }
}
