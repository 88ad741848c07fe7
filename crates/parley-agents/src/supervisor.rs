//! Supervisor runtime.
//!
//! Executes one message through the agent graph:
//!
//! ```text
//! Supervising -> { Handoff(agent) -> Agent tool loop -> Return }* -> Final
//! ```
//!
//! The supervisor node sees the utility tools plus one custom
//! `transfer_to_<agent>(task_instructions)` handoff tool per agent.
//! A handoff records the instructions as a tool message, runs the target
//! agent's own tool loop, and returns with a handoff-back marker the
//! output assembler ignores. The run ends with a structured reply.
//!
//! Agents and the supervisor are constructed eagerly at bootstrap from
//! the composed definitions; an unknown tool name fails the build.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use parley_llm::types::{ChatMessage, ChatRequest, ToolCall};
use parley_llm::{Provider, complete_structured};
use parley_tools::{ToolContext, ToolRegistry};
use parley_types::{AgentDefinitions, SupervisorStructuredReply};

use crate::assembler::extract_reply_text;
use crate::error::{AgentError, Result};
use crate::prompts::supervisor_prompt;
use crate::transcript::{AgentMessage, SUPERVISOR_NAME, to_chat_messages};

/// Prefix of the custom handoff tools.
pub const HANDOFF_PREFIX: &str = "transfer_to_";

/// Utility tools exposed to the supervisor node.
const SUPERVISOR_UTILITY_TOOLS: &[&str] = &["get_current_datetime", "memory_get_context"];

/// Upper bound on supervisor routing turns per message.
const MAX_SUPERVISOR_TURNS: usize = 12;

/// Upper bound on tool-call turns inside one agent run.
const MAX_AGENT_TURNS: usize = 8;

/// One composed agent, resolved against the tool registry.
#[derive(Debug)]
struct AgentRuntime {
    name: String,
    system_message: String,
    tool_names: Vec<String>,
    tool_schemas: Vec<Value>,
}

/// The outcome of one supervisor run.
#[derive(Debug)]
pub struct SupervisorOutcome {
    /// Full run transcript, for the output assembler and logging.
    pub transcript: Vec<AgentMessage>,
    /// The structured final reply.
    pub reply: SupervisorStructuredReply,
}

/// The compiled supervisor graph.
pub struct Supervisor {
    provider: Arc<dyn Provider>,
    model: String,
    registry: Arc<ToolRegistry>,
    agents: Vec<AgentRuntime>,
    system_prompt: String,
    supervisor_tool_schemas: Vec<Value>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("model", &self.model)
            .field("agents", &self.agents)
            .field("system_prompt", &self.system_prompt)
            .field("supervisor_tool_schemas", &self.supervisor_tool_schemas)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Build the graph from composed definitions.
    ///
    /// Fails when there are no agents, when an agent references a tool
    /// missing from the registry, or when a utility tool is not
    /// registered.
    pub fn build(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        registry: Arc<ToolRegistry>,
        definitions: &AgentDefinitions,
    ) -> Result<Self> {
        if definitions.agents.is_empty() {
            return Err(AgentError::NoAgents);
        }

        let mut agents = Vec::with_capacity(definitions.agents.len());
        for def in &definitions.agents {
            let tool_schemas =
                registry
                    .schemas_for(&def.tools)
                    .map_err(|e| match e {
                        parley_tools::ToolError::NotFound(tool) => AgentError::UnknownTool {
                            agent: def.name.clone(),
                            tool,
                        },
                        other => AgentError::Tool(other),
                    })?;
            agents.push(AgentRuntime {
                name: def.name.clone(),
                system_message: def.system_message.clone(),
                tool_names: def.tools.clone(),
                tool_schemas,
            });
        }

        let utility_names: Vec<String> = SUPERVISOR_UTILITY_TOOLS
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut supervisor_tool_schemas = registry.schemas_for(&utility_names).map_err(|e| {
            match e {
                parley_tools::ToolError::NotFound(tool) => AgentError::UnknownTool {
                    agent: SUPERVISOR_NAME.into(),
                    tool,
                },
                other => AgentError::Tool(other),
            }
        })?;
        for agent in &agents {
            supervisor_tool_schemas.push(handoff_tool_schema(&agent.name));
        }

        info!(agents = agents.len(), "supervisor compiled");
        Ok(Self {
            provider,
            model: model.into(),
            registry,
            agents,
            system_prompt: supervisor_prompt(definitions),
            supervisor_tool_schemas,
        })
    }

    /// Run one message through the graph.
    pub async fn run(&self, input: &str, ctx: &ToolContext) -> Result<SupervisorOutcome> {
        let mut transcript = vec![AgentMessage::user(input)];

        for turn in 0..MAX_SUPERVISOR_TURNS {
            let mut messages = vec![ChatMessage::system(&self.system_prompt)];
            messages.extend(to_chat_messages(&transcript));
            let request = ChatRequest::new(&self.model, messages)
                .with_tools(self.supervisor_tool_schemas.clone());

            let response = self.provider.complete(&request).await?;
            let Some(message) = response.message().cloned() else {
                break;
            };
            let calls = message.tool_calls.clone().unwrap_or_default();

            if calls.is_empty() {
                debug!(turn, "supervisor produced final text");
                transcript.push(AgentMessage::supervisor(message.content));
                break;
            }

            transcript.push(AgentMessage::assistant_with_calls(
                SUPERVISOR_NAME,
                message.content,
                calls.clone(),
            ));

            for call in calls {
                self.dispatch_supervisor_call(&call, input, ctx, &mut transcript)
                    .await?;
            }
        }

        let reply = self.finalize(&transcript).await?;
        transcript.push(AgentMessage::supervisor(reply.reply_text.clone()));
        Ok(SupervisorOutcome { transcript, reply })
    }

    /// Execute one supervisor tool call: handoff or utility.
    async fn dispatch_supervisor_call(
        &self,
        call: &ToolCall,
        input: &str,
        ctx: &ToolContext,
        transcript: &mut Vec<AgentMessage>,
    ) -> Result<()> {
        let tool_name = call.function.name.trim();

        if let Some(agent_name) = tool_name.strip_prefix(HANDOFF_PREFIX) {
            let Some(agent) = self.agents.iter().find(|a| a.name == agent_name) else {
                warn!(agent = agent_name, "handoff to unknown agent");
                transcript.push(AgentMessage::tool(
                    &call.id,
                    json!({"error": format!("unknown agent '{agent_name}'")}).to_string(),
                ));
                return Ok(());
            };

            let args = call.function.parsed_arguments();
            let task_instructions = args
                .get("task_instructions")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            info!(agent = %agent.name, "handoff");
            transcript.push(AgentMessage::tool(
                &call.id,
                format!(
                    "Successfully transferred to {agent_name}.\n\n\
                     [INSTRUCTIONS TO FOLLOW]: {task_instructions}"
                ),
            ));

            let agent_reply = self.run_agent(agent, input, &task_instructions, ctx).await?;
            transcript.push(AgentMessage::agent(&agent.name, agent_reply));
            transcript.push(AgentMessage::handoff_back(&agent.name));
            return Ok(());
        }

        // Utility tool (clock, memory). The hardening wrapper turns tool
        // failures into error-like payloads; a registry miss means the
        // supervisor hallucinated a tool name.
        let args = call.function.parsed_arguments();
        let result = match self.registry.execute(tool_name, args, ctx).await {
            Ok(value) => value,
            Err(e) => json!({"error": e.to_string(), "tool": tool_name}),
        };
        transcript.push(AgentMessage::tool(&call.id, tool_content(&result)));
        Ok(())
    }

    /// Run one agent's tool loop until it answers or runs out of turns.
    async fn run_agent(
        &self,
        agent: &AgentRuntime,
        input: &str,
        task_instructions: &str,
        ctx: &ToolContext,
    ) -> Result<String> {
        let mut messages = vec![
            ChatMessage::system(&agent.system_message),
            ChatMessage::user(input),
            ChatMessage::user(format!("[INSTRUCTIONS TO FOLLOW]: {task_instructions}")),
        ];

        for turn in 0..MAX_AGENT_TURNS {
            let request = ChatRequest::new(&self.model, messages.clone())
                .with_tools(agent.tool_schemas.clone());
            let response = self.provider.complete(&request).await?;
            let Some(message) = response.message().cloned() else {
                break;
            };
            let calls = message.tool_calls.clone().unwrap_or_default();

            if calls.is_empty() {
                debug!(agent = %agent.name, turn, "agent answered");
                return Ok(message.content.trim().to_string());
            }

            messages.push(message);
            for call in calls {
                let tool_name = call.function.name.trim().to_string();
                let result = if agent.tool_names.iter().any(|t| t == &tool_name) {
                    match self
                        .registry
                        .execute(&tool_name, call.function.parsed_arguments(), ctx)
                        .await
                    {
                        Ok(value) => value,
                        Err(e) => json!({"error": e.to_string(), "tool": tool_name}),
                    }
                } else {
                    warn!(agent = %agent.name, tool = %tool_name, "agent called unassigned tool");
                    json!({"error": format!("tool '{tool_name}' is not available to this agent")})
                };
                messages.push(ChatMessage::tool(&call.id, tool_content(&result)));
            }
        }

        warn!(agent = %agent.name, "agent ran out of turns without answering");
        Ok(String::new())
    }

    /// Produce the structured final reply.
    ///
    /// When the structured call itself fails but the run produced a
    /// user-facing answer, that answer is salvaged rather than failing
    /// the whole message.
    async fn finalize(&self, transcript: &[AgentMessage]) -> Result<SupervisorStructuredReply> {
        let mut messages = vec![ChatMessage::system(&self.system_prompt)];
        messages.extend(to_chat_messages(transcript));
        messages.push(ChatMessage::user(
            "Produce the final structured reply now. If an agent already produced the \
             user-facing answer, copy it into reply_text verbatim.",
        ));

        let structured: std::result::Result<SupervisorStructuredReply, _> = complete_structured(
            self.provider.as_ref(),
            &self.model,
            messages,
            "supervisor_structured_reply",
            SupervisorStructuredReply::json_schema(),
        )
        .await;

        match structured {
            Ok(reply) if !reply.reply_text.trim().is_empty() => Ok(reply),
            Ok(reply) => {
                // Structured call answered but with empty text; fall back
                // to the transcript.
                let salvaged = extract_reply_text(transcript);
                if salvaged.is_empty() {
                    Ok(reply)
                } else {
                    Ok(SupervisorStructuredReply {
                        reply_text: salvaged,
                        ..reply
                    })
                }
            }
            Err(e) => {
                let salvaged = extract_reply_text(transcript);
                if salvaged.is_empty() {
                    return Err(e.into());
                }
                warn!(error = %e, "structured finalization failed, salvaging transcript reply");
                Ok(SupervisorStructuredReply::text(salvaged))
            }
        }
    }
}

/// Schema for a `transfer_to_<agent>` handoff tool.
fn handoff_tool_schema(agent_name: &str) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": format!("{HANDOFF_PREFIX}{agent_name}"),
            "description": format!("Ask agent '{agent_name}' for help"),
            "parameters": {
                "type": "object",
                "properties": {
                    "task_instructions": {
                        "type": "string",
                        "description": "Specify EXACTLY what this agent should do, what data \
                                        they should retrieve, and what output you expect back. \
                                        Include any specific parameters or constraints that \
                                        will help the agent complete the task successfully."
                    }
                },
                "required": ["task_instructions"]
            }
        }
    })
}

/// Flatten a tool result into tool-message content.
fn tool_content(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_llm::types::{ChatResponse, Choice, FunctionCall};
    use parley_llm::{ProviderError, Result as LlmResult};
    use parley_tools::{Tool, ToolError};
    use parley_types::AgentDefinition;
    use std::sync::Mutex;

    /// Provider scripted with whole responses (text or tool calls).
    struct ScriptedProvider {
        responses: Mutex<Vec<ChatMessage>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ChatMessage>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ChatRequest) -> LlmResult<ChatResponse> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(ProviderError::RequestFailed("script exhausted".into()));
            }
            Ok(ChatResponse {
                id: "r".into(),
                model: request.model.clone(),
                usage: None,
                choices: vec![Choice {
                    index: 0,
                    message: responses.remove(0),
                    finish_reason: None,
                }],
            })
        }
    }

    fn text(content: &str) -> ChatMessage {
        ChatMessage::assistant(content)
    }

    fn call(id: &str, name: &str, args: Value) -> ChatMessage {
        ChatMessage {
            role: "assistant".into(),
            content: String::new(),
            tool_call_id: None,
            tool_calls: Some(vec![ToolCall {
                id: id.into(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: name.into(),
                    arguments: args.to_string(),
                },
            }]),
        }
    }

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
            Some(json!({"type": "object", "properties": {}}))
        }
        fn source_server(&self) -> &str {
            "notes"
        }
        async fn execute(
            &self,
            _args: Value,
            ctx: &ToolContext,
        ) -> std::result::Result<Value, ToolError> {
            ctx.grounding.record("notes_create_page", true);
            Ok(json!({"id": "p1"}))
        }
    }

    struct ClockTool;

    #[async_trait]
    impl Tool for ClockTool {
        fn name(&self) -> &str {
            "get_current_datetime"
        }
        fn description(&self) -> &str {
            "UTC clock"
        }
        fn parameters(&self) -> Option<Value> {
            Some(json!({"type": "object", "properties": {}}))
        }
        fn source_server(&self) -> &str {
            "supervisor"
        }
        async fn execute(
            &self,
            _args: Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<Value, ToolError> {
            Ok(Value::String("2026-07-01T00:00:00+00:00".into()))
        }
    }

    struct MemoryStubTool;

    #[async_trait]
    impl Tool for MemoryStubTool {
        fn name(&self) -> &str {
            "memory_get_context"
        }
        fn description(&self) -> &str {
            "Memory"
        }
        fn parameters(&self) -> Option<Value> {
            Some(json!({"type": "object", "properties": {}}))
        }
        fn source_server(&self) -> &str {
            "supervisor"
        }
        async fn execute(
            &self,
            _args: Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<Value, ToolError> {
            Ok(json!({"user_profile": null, "conversation_state": null}))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CreatePageTool));
        registry.register(Arc::new(ClockTool));
        registry.register(Arc::new(MemoryStubTool));
        Arc::new(registry)
    }

    fn definitions() -> AgentDefinitions {
        AgentDefinitions {
            agents: vec![AgentDefinition {
                name: "notes_pages".into(),
                responsibility: "Create pages.".into(),
                system_message: "You manage pages.".into(),
                tools: vec!["notes_create_page".into()],
                source_server: "notes".into(),
            }],
        }
    }

    fn structured(reply_text: &str) -> ChatMessage {
        text(&json!({
            "reply_text": reply_text,
            "status": "success",
            "actions": ["created note"]
        })
        .to_string())
    }

    #[test]
    fn build_rejects_unknown_tool() {
        let defs = AgentDefinitions {
            agents: vec![AgentDefinition {
                name: "notes_pages".into(),
                responsibility: "x".into(),
                system_message: "x".into(),
                tools: vec!["notes_ghost".into()],
                source_server: "notes".into(),
            }],
        };
        let err = Supervisor::build(
            ScriptedProvider::new(vec![]),
            "m",
            registry(),
            &defs,
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool { tool, .. } if tool == "notes_ghost"));
    }

    #[test]
    fn build_rejects_empty_agent_set() {
        let err = Supervisor::build(
            ScriptedProvider::new(vec![]),
            "m",
            registry(),
            &AgentDefinitions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::NoAgents));
    }

    #[test]
    fn build_exposes_handoff_tools() {
        let supervisor =
            Supervisor::build(ScriptedProvider::new(vec![]), "m", registry(), &definitions())
                .unwrap();
        let names: Vec<&str> = supervisor
            .supervisor_tool_schemas
            .iter()
            .filter_map(|s| s["function"]["name"].as_str())
            .collect();
        assert!(names.contains(&"get_current_datetime"));
        assert!(names.contains(&"memory_get_context"));
        assert!(names.contains(&"transfer_to_notes_pages"));
    }

    #[tokio::test]
    async fn direct_answer_without_tools() {
        let provider = ScriptedProvider::new(vec![
            text("Hello! How can I help?"),
            structured("Hello! How can I help?"),
        ]);
        let supervisor = Supervisor::build(provider, "m", registry(), &definitions()).unwrap();
        let ctx = ToolContext::default();
        let outcome = supervisor.run("INPUT_ENVELOPE_JSON:\n{}\n", &ctx).await.unwrap();

        assert_eq!(outcome.reply.reply_text, "Hello! How can I help?");
        assert!(outcome.reply.status.is_success());
        assert_eq!(extract_reply_text(&outcome.transcript), "Hello! How can I help?");
        assert!(!ctx.grounding.any_grounded_success(false));
    }

    #[tokio::test]
    async fn handoff_runs_agent_and_grounds() {
        let provider = ScriptedProvider::new(vec![
            // Supervisor routes to the agent.
            call(
                "c1",
                "transfer_to_notes_pages",
                json!({"task_instructions": "Call notes_create_page with title 'groceries'."}),
            ),
            // Agent calls its tool.
            call("c2", "notes_create_page", json!({"title": "groceries"})),
            // Agent answers.
            text("Created the note about groceries."),
            // Supervisor wraps up.
            text("Your note about groceries was created."),
            // Structured finalization.
            structured("Your note about groceries was created."),
        ]);
        let supervisor = Supervisor::build(provider, "m", registry(), &definitions()).unwrap();
        let ctx = ToolContext::for_message("u1", "c1", "m1", "whatsapp", "1-0");
        let outcome = supervisor.run("please save a note", &ctx).await.unwrap();

        assert_eq!(outcome.reply.reply_text, "Your note about groceries was created.");
        assert!(ctx.grounding.any_grounded_success(false));

        // The handoff tool message carries the task instructions.
        let handoff_msg = outcome
            .transcript
            .iter()
            .find(|m| m.role == "tool" && m.content.contains("INSTRUCTIONS TO FOLLOW"))
            .unwrap();
        assert!(handoff_msg.content.contains("groceries"));

        // The handoff-back marker is present and internal.
        assert!(outcome.transcript.iter().any(|m| m.is_handoff_back));
    }

    #[tokio::test]
    async fn utility_tool_call_recorded_in_transcript() {
        let provider = ScriptedProvider::new(vec![
            call("c1", "get_current_datetime", json!({})),
            text("It is July 1st, 2026."),
            structured("It is July 1st, 2026."),
        ]);
        let supervisor = Supervisor::build(provider, "m", registry(), &definitions()).unwrap();
        let ctx = ToolContext::default();
        let outcome = supervisor.run("what day is it?", &ctx).await.unwrap();

        let tool_msg = outcome
            .transcript
            .iter()
            .find(|m| m.role == "tool")
            .unwrap();
        assert!(tool_msg.content.contains("2026-07-01"));
        assert_eq!(outcome.reply.reply_text, "It is July 1st, 2026.");
    }

    #[tokio::test]
    async fn unknown_handoff_target_reports_error() {
        let provider = ScriptedProvider::new(vec![
            call("c1", "transfer_to_ghost_agent", json!({"task_instructions": "x"})),
            text("Sorry, I cannot do that."),
            structured("Sorry, I cannot do that."),
        ]);
        let supervisor = Supervisor::build(provider, "m", registry(), &definitions()).unwrap();
        let outcome = supervisor
            .run("do something", &ToolContext::default())
            .await
            .unwrap();
        let tool_msg = outcome
            .transcript
            .iter()
            .find(|m| m.role == "tool")
            .unwrap();
        assert!(tool_msg.content.contains("unknown agent"));
    }

    #[tokio::test]
    async fn finalize_salvages_transcript_on_structured_failure() {
        // Supervisor answers, then the structured call (and its retry)
        // run the script dry.
        let provider = ScriptedProvider::new(vec![text("Direct answer.")]);
        let supervisor = Supervisor::build(provider, "m", registry(), &definitions()).unwrap();
        let outcome = supervisor.run("hi", &ToolContext::default()).await.unwrap();
        assert_eq!(outcome.reply.reply_text, "Direct answer.");
    }

    #[tokio::test]
    async fn provider_failure_with_no_answer_is_error() {
        let provider = ScriptedProvider::new(vec![]);
        let supervisor = Supervisor::build(provider, "m", registry(), &definitions()).unwrap();
        assert!(supervisor.run("hi", &ToolContext::default()).await.is_err());
    }
}
