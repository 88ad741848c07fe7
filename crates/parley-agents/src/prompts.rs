//! Prompt builders for the composer and the supervisor.

use parley_types::{AgentDefinitions, ServerRules, ToolRecord};

/// The rule every generated agent must carry: repair tool arguments
/// from the schema on a validation error, retry at most once.
pub const REPAIR_RULE: &str = "If a tool call fails with a validation error, consult that \
     tool's args_schema, fix the request arguments, and retry the corrected call once. \
     Never retry with the same invalid payload.";

/// Build the categorization prompt for one server's tools.
pub fn categorization_prompt(
    server_name: &str,
    records: &[ToolRecord],
    rules: Option<&ServerRules>,
    max_tools_per_agent: usize,
) -> String {
    let tool_info: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            serde_json::json!({
                "name": r.name,
                "description": r.description,
                "source_server": r.source_server,
                "args_schema": r.args_schema,
            })
        })
        .collect();
    let tool_info_str =
        serde_json::to_string_pretty(&tool_info).unwrap_or_else(|_| "[]".to_string());

    let mut prompt = format!(
        "You are an expert in designing multi-agent systems. I have a collection of {count} \
         tools from the tool server '{server_name}' that I want to organize into logical \
         agent groups.\n\n\
         Each tool has a name, description, source_server it belongs to, and may include an \
         args_schema (tool argument schema). Here are the available tools:\n{tool_info_str}\n\n\
         IMPORTANT: analyze these tools and group them into specialized agents based on \
         related functionality and purpose. Each group is a single agent; no agent may have \
         more than {max} tools. If a grouping would exceed {max} tools, create more agents.\n\n\
         CRITICAL RELIABILITY REQUIREMENT:\n\
         - Tool calls can fail due to invalid argument shapes (schema/validation errors).\n\
         - When a tool call fails with a validation error, the agent MUST consult that \
         tool's args_schema (if provided) and fix the request arguments.\n\
         - The agent MUST NOT retry with the same invalid payload repeatedly.\n\
         - The agent should retry the corrected tool call once.\n\n\
         For each agent, provide:\n\
         1. A descriptive snake_case name prefixed by the source_server \
         (e.g., \"{server_name}_pages\", \"{server_name}_search\").\n\
         2. A clear responsibility statement (what tasks this agent handles, at most two \
         sentences).\n\
         3. A concise system message (2-3 sentences) written in SECOND-PERSON perspective \
         (\"You manage...\" NOT \"I manage...\"). The system message MUST include a rule \
         about using args_schema to repair tool calls when validation fails (and retry \
         only once).\n\
         4. The list of tool names this agent should have access to.\n\
         5. The source_server it belongs to.\n\n\
         Make sure every tool is assigned to exactly one agent, and the groupings are \
         logical based on related functionality.",
        count = records.len(),
        max = max_tools_per_agent,
    );

    if let Some(rules) = rules {
        if let Some(notes) = rules.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            prompt.push_str("\n\nServer-specific guidance:\n");
            prompt.push_str(notes.trim());
        }
        if !rules.blacklisted_tools.is_empty() {
            prompt.push_str(&format!(
                "\n\nNever assign these tools (they are disabled): {}",
                rules.blacklisted_tools.join(", ")
            ));
        }
    }

    prompt
}

/// Build the supervisor system prompt from the composed agents.
pub fn supervisor_prompt(definitions: &AgentDefinitions) -> String {
    let agents_info = definitions
        .agents
        .iter()
        .map(|a| {
            format!(
                "- {}: {} | tools={}",
                a.name.to_lowercase(),
                a.responsibility,
                a.tools.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a Supervisor that routes user requests to specialized agents.\n\n\
         INPUT ENVELOPE (REQUIRED)\n\
         - The user message includes INPUT_ENVELOPE_JSON (schema: inbound_envelope_v1).\n\
         - Treat the envelope as source of truth: original_text, english_text, \
         detected_language, inbound_has_audio, reply_in_audio.\n\
         - For routing and tool calls, prefer english_text.\n\
         - If english_text is missing or empty, call: \
         local_audio_detect_and_translate_to_english(text=original_text)\n\n\
         AGENTS\n{agents_info}\n\n\
         SUPERVISOR TOOLS\n\
         - get_current_datetime (UTC)\n\
         - memory_get_context (user_profile, conversation_state, recent_events)\n\n\
         CUSTOM HANDOFF (CRITICAL)\n\
         - Use transfer_to_<agent_name>(task_instructions=...) for every agent handoff.\n\
         - Route by agent responsibility and verified tool capability (write vs. search).\n\
         - task_instructions MUST include explicit tool calls, their arguments, and the \
         expected output shape.\n\n\
         GROUNDING RULE (CRITICAL)\n\
         - If the user asks about THEIR personal data (notes, reminders, \"my goals\", \
         \"what did I save\", etc.):\n\
         1) Call memory_get_context first.\n\
         2) If memory is insufficient, route to the correct agent (search vs. write).\n\
         3) If tools find nothing, ask a single clarifying question (keyword/title/date).\n\
         - For time-sensitive asks (\"today\", \"now\", \"current\"), call \
         get_current_datetime first.\n\n\
         LANGUAGE POLICY\n\
         - Reply in detected_language unless the user overrides.\n\
         - If translation is needed, call local_audio_translate_text(...). Never claim a \
         translation happened unless the tool was called.\n\n\
         AUDIO POLICY\n\
         - If reply_in_audio=true: call local_audio_text_to_speech(...) and include \
         tts_file_path and tts_format in the structured reply.\n\n\
         OUTPUT CONTRACT (MUST)\n\
         - Always produce a structured reply with keys: reply_text, status \
         (success|error), optional actions, optional error_message, optional \
         tts_file_path/tts_format.\n\
         - If an agent produced the user-facing answer, reply_text MUST equal it \
         (no rewriting)."
    )
}
