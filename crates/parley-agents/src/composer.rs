//! LLM-driven agent composition.
//!
//! Groups discovered tool records by source server and asks the LLM to
//! categorize each server's tools into specialized agents, then enforces
//! the hard constraints the LLM cannot be trusted with:
//!
//! - every tool assigned to exactly one agent (missing tools attach to
//!   the server's first agent, duplicates keep their first claimant,
//!   hallucinated names are dropped)
//! - no composed agent exceeds `max_tools_per_agent` (oversized agents
//!   are split)
//! - agents demanded by server rules (`desired_agents`) are created
//!   verbatim and their tools are never re-assigned
//! - blacklisted tools are never assigned
//! - agent names are snake_case and prefixed by their source server
//!
//! Policy packs and `{{PLACEHOLDER}}` rendering are applied to every
//! composed agent, and every system message carries the
//! repair-once-on-validation-error rule. When the categorization call
//! fails outright, the composer falls back to one agent per server.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use parley_llm::types::ChatMessage;
use parley_llm::{Provider, complete_structured};
use parley_types::{
    AgentDefinition, AgentDefinitions, AgentRules, PolicyPack, ServerRules, Settings, ToolRecord,
};

use crate::placeholder::render_placeholders;
use crate::policy::apply_policy_packs;
use crate::prompts::{REPAIR_RULE, categorization_prompt};

/// Composes agent definitions from discovered tool records.
pub struct AgentComposer {
    provider: Arc<dyn Provider>,
    model: String,
    max_tools_per_agent: usize,
    settings: Arc<Settings>,
    policy_packs: Vec<PolicyPack>,
}

impl AgentComposer {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        settings: Arc<Settings>,
        policy_packs: Vec<PolicyPack>,
    ) -> Self {
        let max_tools_per_agent = settings.max_tools_per_agent.max(1);
        Self {
            provider,
            model: model.into(),
            max_tools_per_agent,
            settings,
            policy_packs,
        }
    }

    /// Compose the full agent set from all discovered records.
    pub async fn compose(&self, records: &[ToolRecord], rules: &AgentRules) -> AgentDefinitions {
        // Group by source server; BTreeMap keeps composition order
        // deterministic.
        let mut by_server: BTreeMap<String, Vec<ToolRecord>> = BTreeMap::new();
        for record in records {
            by_server
                .entry(record.source_server.clone())
                .or_default()
                .push(record.clone());
        }

        let mut all_agents = Vec::new();
        for (server, server_records) in &by_server {
            let server_rules = rules.servers.get(server);
            let agents = self
                .compose_server(server, server_records, server_rules)
                .await;
            all_agents.extend(agents);
        }

        info!(agents = all_agents.len(), "agent definitions composed");
        AgentDefinitions { agents: all_agents }
    }

    /// Compose one server's agents.
    async fn compose_server(
        &self,
        server: &str,
        records: &[ToolRecord],
        rules: Option<&ServerRules>,
    ) -> Vec<AgentDefinition> {
        // Blacklist defense in depth: discovery already filters, but a
        // blacklisted tool must never be assigned regardless of input.
        let blacklist: HashSet<&str> = rules
            .map(|r| r.blacklisted_tools.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let records: Vec<ToolRecord> = records
            .iter()
            .filter(|r| !blacklist.contains(r.name.as_str()))
            .cloned()
            .collect();

        // Desired agents are created verbatim; their tools never go to
        // the categorization call.
        let mut agents: Vec<AgentDefinition> = Vec::new();
        let mut desired_count = 0usize;
        let mut claimed: HashSet<String> = HashSet::new();
        if let Some(rules) = rules {
            for desired in &rules.desired_agents {
                claimed.extend(desired.tools.iter().cloned());
                agents.push(AgentDefinition {
                    name: desired.name.clone(),
                    responsibility: desired.responsibility.clone(),
                    system_message: desired.system_message.clone(),
                    tools: desired.tools.clone(),
                    source_server: server.to_string(),
                });
                desired_count += 1;
            }
        }

        let llm_records: Vec<ToolRecord> = records
            .iter()
            .filter(|r| !claimed.contains(&r.name))
            .cloned()
            .collect();

        if !llm_records.is_empty() {
            let composed = match self.categorize(server, &llm_records, rules).await {
                Ok(defs) => defs.agents,
                Err(e) => {
                    warn!(
                        server,
                        error = %e,
                        "LLM categorization failed, falling back to source-based grouping"
                    );
                    vec![fallback_agent(server, &llm_records)]
                }
            };
            let enforced = self.enforce_constraints(server, composed, &llm_records);
            agents.extend(enforced);
        }

        // Policy packs + placeholders + the repair rule apply to every
        // agent, desired ones included.
        for agent in agents.iter_mut() {
            let applied = apply_policy_packs(agent, &self.policy_packs);
            if !applied.is_empty() {
                info!(agent = %agent.name, packs = ?applied, "policy packs applied");
            }
            agent.system_message = render_placeholders(&agent.system_message, &self.settings);
            ensure_repair_rule(agent);
        }

        info!(
            server,
            agents = agents.len(),
            desired = desired_count,
            "server agents composed"
        );
        agents
    }

    async fn categorize(
        &self,
        server: &str,
        records: &[ToolRecord],
        rules: Option<&ServerRules>,
    ) -> crate::error::Result<AgentDefinitions> {
        let prompt = categorization_prompt(server, records, rules, self.max_tools_per_agent);
        let defs: AgentDefinitions = complete_structured(
            self.provider.as_ref(),
            &self.model,
            vec![ChatMessage::user(prompt)],
            "agent_definitions",
            AgentDefinitions::json_schema(),
        )
        .await?;
        Ok(defs)
    }

    /// Enforce the hard constraints on LLM-composed agents.
    fn enforce_constraints(
        &self,
        server: &str,
        composed: Vec<AgentDefinition>,
        records: &[ToolRecord],
    ) -> Vec<AgentDefinition> {
        let available: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();
        let mut assigned: HashSet<String> = HashSet::new();
        let mut agents: Vec<AgentDefinition> = Vec::new();

        for mut agent in composed {
            agent.name = prefixed_agent_name(server, &agent.name);
            agent.source_server = server.to_string();

            // Keep only tools that exist for this server and are not
            // already claimed; the first claimant wins.
            let mut tools = Vec::new();
            for tool in agent.tools.drain(..) {
                if !available.contains(tool.as_str()) {
                    warn!(agent = %agent.name, tool = %tool, "dropping unknown tool from agent");
                    continue;
                }
                if assigned.insert(tool.clone()) {
                    tools.push(tool);
                }
            }
            agent.tools = tools;
            if !agent.tools.is_empty() {
                agents.push(agent);
            }
        }

        // Tools the LLM forgot attach to the first agent.
        let missing: Vec<String> = records
            .iter()
            .map(|r| r.name.clone())
            .filter(|name| !assigned.contains(name))
            .collect();
        if !missing.is_empty() {
            warn!(server, missing = ?missing, "LLM did not assign all tools");
            match agents.first_mut() {
                Some(first) => first.tools.extend(missing),
                None => agents.push(fallback_agent(server, records)),
            }
        }

        // Split anything over the cap.
        let mut capped = Vec::new();
        for agent in agents {
            if agent.tools.len() <= self.max_tools_per_agent {
                capped.push(agent);
                continue;
            }
            let chunks: Vec<Vec<String>> = agent
                .tools
                .chunks(self.max_tools_per_agent)
                .map(<[String]>::to_vec)
                .collect();
            warn!(
                agent = %agent.name,
                tools = agent.tools.len(),
                parts = chunks.len(),
                "splitting agent over max_tools_per_agent"
            );
            for (i, chunk) in chunks.into_iter().enumerate() {
                let mut part = agent.clone();
                if i > 0 {
                    part.name = format!("{}_{}", agent.name, i + 1);
                }
                part.tools = chunk;
                capped.push(part);
            }
        }
        capped
    }
}

/// Normalize an agent name to snake_case with the server prefix.
fn prefixed_agent_name(server: &str, name: &str) -> String {
    let server_norm = normalize_name(server);
    let name_norm = normalize_name(name);
    if name_norm == server_norm || name_norm.starts_with(&format!("{server_norm}_")) {
        name_norm
    } else {
        format!("{server_norm}_{name_norm}")
    }
}

/// Lowercase, spaces/dashes to underscores, strip anything else odd.
fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        match c {
            ' ' | '-' => out.push('_'),
            c if c.is_ascii_alphanumeric() || c == '_' => out.push(c.to_ascii_lowercase()),
            _ => {}
        }
    }
    out
}

/// Guarantee the schema-repair rule is present in a system message.
fn ensure_repair_rule(agent: &mut AgentDefinition) {
    let lower = agent.system_message.to_lowercase();
    if lower.contains("validation") && lower.contains("retry") {
        return;
    }
    if !agent.system_message.is_empty() {
        agent.system_message.push_str("\n\n");
    }
    agent.system_message.push_str(REPAIR_RULE);
}

/// One agent covering a whole server; used when categorization fails.
fn fallback_agent(server: &str, records: &[ToolRecord]) -> AgentDefinition {
    let tool_names: Vec<String> = records.iter().map(|r| r.name.clone()).collect();
    AgentDefinition {
        name: normalize_name(server),
        responsibility: format!("Handle operations for server '{server}'."),
        system_message: format!(
            "You operate as the {server} agent. You handle requests using these tools: {}. \
             Use only the listed capabilities and ask for clarification if a request is \
             outside them.",
            tool_names.join(", ")
        ),
        tools: tool_names,
        source_server: server.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_llm::types::{ChatRequest, ChatResponse, Choice};
    use parley_llm::{ProviderError, Result as LlmResult};
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<Vec<LlmResult<String>>>,
    }

    impl ScriptedProvider {
        fn with(replies: Vec<LlmResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ChatRequest) -> LlmResult<ChatResponse> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(ProviderError::RequestFailed("script exhausted".into()));
            }
            let content = replies.remove(0)?;
            Ok(ChatResponse {
                id: "r".into(),
                model: request.model.clone(),
                usage: None,
                choices: vec![Choice {
                    index: 0,
                    message: ChatMessage::assistant(content),
                    finish_reason: Some("stop".into()),
                }],
            })
        }
    }

    fn record(name: &str, server: &str) -> ToolRecord {
        ToolRecord {
            name: name.into(),
            description: format!("{name} tool"),
            args_schema: None,
            source_server: server.into(),
        }
    }

    fn defs_json(agents: serde_json::Value) -> String {
        serde_json::json!({ "agents": agents }).to_string()
    }

    fn composer(provider: Arc<ScriptedProvider>) -> AgentComposer {
        AgentComposer::new(
            provider,
            "gpt-4o-mini",
            Arc::new(Settings::default()),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn happy_path_composition() {
        let provider = ScriptedProvider::with(vec![Ok(defs_json(serde_json::json!([{
            "name": "notes_pages",
            "responsibility": "Create and update pages.",
            "system_message": "You manage pages. On a validation error, fix args from the schema and retry once.",
            "tools": ["notes_create_page", "notes_update_page"],
            "source_server": "notes"
        }, {
            "name": "notes_search",
            "responsibility": "Find pages.",
            "system_message": "You search pages. On a validation error, fix args from the schema and retry once.",
            "tools": ["notes_search"],
            "source_server": "notes"
        }])))]);

        let records = vec![
            record("notes_create_page", "notes"),
            record("notes_update_page", "notes"),
            record("notes_search", "notes"),
        ];
        let defs = composer(provider)
            .compose(&records, &AgentRules::default())
            .await;

        assert_eq!(defs.agents.len(), 2);
        let assigned: Vec<&String> = defs.agents.iter().flat_map(|a| &a.tools).collect();
        assert_eq!(assigned.len(), 3);
    }

    #[tokio::test]
    async fn missing_tools_attach_to_first_agent() {
        let provider = ScriptedProvider::with(vec![Ok(defs_json(serde_json::json!([{
            "name": "notes_pages",
            "responsibility": "Pages.",
            "system_message": "You manage pages; on validation errors repair and retry once.",
            "tools": ["notes_create_page"],
            "source_server": "notes"
        }])))]);

        let records = vec![
            record("notes_create_page", "notes"),
            record("notes_search", "notes"),
        ];
        let defs = composer(provider)
            .compose(&records, &AgentRules::default())
            .await;

        assert_eq!(defs.agents.len(), 1);
        assert!(defs.agents[0].tools.contains(&"notes_search".to_string()));
    }

    #[tokio::test]
    async fn duplicate_assignment_keeps_first_claimant() {
        let provider = ScriptedProvider::with(vec![Ok(defs_json(serde_json::json!([{
            "name": "notes_a",
            "responsibility": "A.",
            "system_message": "You do A; repair validation errors and retry once.",
            "tools": ["notes_search"],
            "source_server": "notes"
        }, {
            "name": "notes_b",
            "responsibility": "B.",
            "system_message": "You do B; repair validation errors and retry once.",
            "tools": ["notes_search", "notes_create_page"],
            "source_server": "notes"
        }])))]);

        let records = vec![
            record("notes_search", "notes"),
            record("notes_create_page", "notes"),
        ];
        let defs = composer(provider)
            .compose(&records, &AgentRules::default())
            .await;

        let a = defs.agents.iter().find(|a| a.name == "notes_a").unwrap();
        let b = defs.agents.iter().find(|a| a.name == "notes_b").unwrap();
        assert_eq!(a.tools, vec!["notes_search"]);
        assert_eq!(b.tools, vec!["notes_create_page"]);
    }

    #[tokio::test]
    async fn oversized_agent_is_split() {
        let tools: Vec<String> = (0..7).map(|i| format!("notes_t{i}")).collect();
        let provider = ScriptedProvider::with(vec![Ok(defs_json(serde_json::json!([{
            "name": "notes_all",
            "responsibility": "Everything.",
            "system_message": "You do everything; repair validation errors and retry once.",
            "tools": tools,
            "source_server": "notes"
        }])))]);

        let records: Vec<ToolRecord> =
            (0..7).map(|i| record(&format!("notes_t{i}"), "notes")).collect();
        let defs = composer(provider)
            .compose(&records, &AgentRules::default())
            .await;

        assert_eq!(defs.agents.len(), 2);
        assert_eq!(defs.agents[0].name, "notes_all");
        assert_eq!(defs.agents[0].tools.len(), 5);
        assert_eq!(defs.agents[1].name, "notes_all_2");
        assert_eq!(defs.agents[1].tools.len(), 2);
    }

    #[tokio::test]
    async fn hallucinated_tools_are_dropped() {
        let provider = ScriptedProvider::with(vec![Ok(defs_json(serde_json::json!([{
            "name": "notes_pages",
            "responsibility": "Pages.",
            "system_message": "You manage pages; repair validation errors and retry once.",
            "tools": ["notes_create_page", "notes_imaginary_tool"],
            "source_server": "notes"
        }])))]);

        let records = vec![record("notes_create_page", "notes")];
        let defs = composer(provider)
            .compose(&records, &AgentRules::default())
            .await;
        assert_eq!(defs.agents[0].tools, vec!["notes_create_page"]);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_one_agent_per_server() {
        // Both the call and its structured-output retry fail.
        let provider = ScriptedProvider::with(vec![
            Err(ProviderError::RequestFailed("down".into())),
            Err(ProviderError::RequestFailed("down".into())),
        ]);

        let records = vec![
            record("notes_search", "notes"),
            record("notes_create_page", "notes"),
        ];
        let defs = composer(provider)
            .compose(&records, &AgentRules::default())
            .await;

        assert_eq!(defs.agents.len(), 1);
        assert_eq!(defs.agents[0].name, "notes");
        assert_eq!(defs.agents[0].tools.len(), 2);
        // Fallback message still carries the repair rule.
        assert!(defs.agents[0].system_message.contains("retry"));
    }

    #[tokio::test]
    async fn desired_agents_created_verbatim() {
        let provider = ScriptedProvider::with(vec![Ok(defs_json(serde_json::json!([{
            "name": "notes_rest",
            "responsibility": "Everything else.",
            "system_message": "You handle the rest; repair validation errors and retry once.",
            "tools": ["notes_search"],
            "source_server": "notes"
        }])))]);

        let rules: AgentRules = serde_json::from_value(serde_json::json!({
            "servers": {
                "notes": {
                    "desired_agents": [{
                        "name": "notes_pages",
                        "responsibility": "Create pages only.",
                        "system_message": "You create pages; on validation errors repair and retry once.",
                        "tools": ["notes_create_page"]
                    }]
                }
            }
        }))
        .unwrap();

        let records = vec![
            record("notes_create_page", "notes"),
            record("notes_search", "notes"),
        ];
        let defs = composer(provider).compose(&records, &rules).await;

        let desired = defs.agents.iter().find(|a| a.name == "notes_pages").unwrap();
        assert_eq!(desired.responsibility, "Create pages only.");
        assert_eq!(desired.tools, vec!["notes_create_page"]);
        // The other agent got only the remaining tool.
        let rest = defs.agents.iter().find(|a| a.name == "notes_rest").unwrap();
        assert_eq!(rest.tools, vec!["notes_search"]);
    }

    #[tokio::test]
    async fn blacklisted_tools_never_assigned() {
        let provider = ScriptedProvider::with(vec![Ok(defs_json(serde_json::json!([{
            "name": "notes_pages",
            "responsibility": "Pages.",
            "system_message": "You manage pages; repair validation errors and retry once.",
            "tools": ["notes_create_page", "notes_delete_page"],
            "source_server": "notes"
        }])))]);

        let rules: AgentRules = serde_json::from_value(serde_json::json!({
            "servers": {"notes": {"blacklisted_tools": ["notes_delete_page"]}}
        }))
        .unwrap();

        let records = vec![
            record("notes_create_page", "notes"),
            record("notes_delete_page", "notes"),
        ];
        let defs = composer(provider).compose(&records, &rules).await;
        let assigned: Vec<&String> = defs.agents.iter().flat_map(|a| &a.tools).collect();
        assert!(!assigned.contains(&&"notes_delete_page".to_string()));
    }

    #[tokio::test]
    async fn names_are_normalized_and_prefixed() {
        let provider = ScriptedProvider::with(vec![Ok(defs_json(serde_json::json!([{
            "name": "Page Manager",
            "responsibility": "Pages.",
            "system_message": "You manage pages; repair validation errors and retry once.",
            "tools": ["notes_create_page"],
            "source_server": "notes"
        }])))]);

        let records = vec![record("notes_create_page", "notes")];
        let defs = composer(provider)
            .compose(&records, &AgentRules::default())
            .await;
        assert_eq!(defs.agents[0].name, "notes_page_manager");
    }

    #[tokio::test]
    async fn repair_rule_appended_when_missing() {
        let provider = ScriptedProvider::with(vec![Ok(defs_json(serde_json::json!([{
            "name": "notes_pages",
            "responsibility": "Pages.",
            "system_message": "You manage pages.",
            "tools": ["notes_create_page"],
            "source_server": "notes"
        }])))]);

        let records = vec![record("notes_create_page", "notes")];
        let defs = composer(provider)
            .compose(&records, &AgentRules::default())
            .await;
        let msg = &defs.agents[0].system_message;
        assert!(msg.contains("retry the corrected call once"));
    }

    #[tokio::test]
    async fn placeholders_rendered_from_settings() {
        let provider = ScriptedProvider::with(vec![Ok(defs_json(serde_json::json!([{
            "name": "notes_pages",
            "responsibility": "Pages.",
            "system_message": "You create pages under {{NOTES_PARENT_PAGE_ID}}; repair validation errors and retry once.",
            "tools": ["notes_create_page"],
            "source_server": "notes"
        }])))]);

        let mut settings = Settings::default();
        settings.notes_parent_page_id = Some("parent-77".into());
        let composer = AgentComposer::new(
            provider,
            "gpt-4o-mini",
            Arc::new(settings),
            Vec::new(),
        );
        let records = vec![record("notes_create_page", "notes")];
        let defs = composer.compose(&records, &AgentRules::default()).await;
        assert!(defs.agents[0].system_message.contains("parent-77"));
    }

    #[tokio::test]
    async fn policy_packs_wrap_messages() {
        let provider = ScriptedProvider::with(vec![Ok(defs_json(serde_json::json!([{
            "name": "notes_pages",
            "responsibility": "Pages.",
            "system_message": "You manage pages; repair validation errors and retry once.",
            "tools": ["notes_create_page"],
            "source_server": "notes"
        }])))]);

        let pack: PolicyPack = serde_json::from_value(serde_json::json!({
            "id": "global",
            "match": {"source_servers": ["*"]},
            "inject": {"prepend_system_message": "Be brief."}
        }))
        .unwrap();
        let composer = AgentComposer::new(
            provider,
            "gpt-4o-mini",
            Arc::new(Settings::default()),
            vec![pack],
        );
        let records = vec![record("notes_create_page", "notes")];
        let defs = composer.compose(&records, &AgentRules::default()).await;
        assert!(defs.agents[0].system_message.starts_with("Be brief."));
    }

    #[test]
    fn name_normalization() {
        assert_eq!(normalize_name("Page Manager"), "page_manager");
        assert_eq!(normalize_name("notes-api"), "notes_api");
        assert_eq!(prefixed_agent_name("notes", "pages"), "notes_pages");
        assert_eq!(prefixed_agent_name("notes", "notes_pages"), "notes_pages");
        assert_eq!(prefixed_agent_name("notes", "notes"), "notes");
    }
}
