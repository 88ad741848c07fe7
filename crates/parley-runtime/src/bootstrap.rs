//! One-time process wiring.
//!
//! Builds the shared pieces exactly once per process and hands back the
//! runnable loops: LLM provider, stream store, memory, tool discovery
//! (remote + local), validation wrapping, agent composition, supervisor,
//! preprocessor, worker, dispatcher. Caches (policy packs, discovery
//! results, composed agents) are immutable after bootstrap.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use parley_agents::supervisor_tools::{GetCurrentDatetimeTool, MemoryGetContextTool};
use parley_agents::{AgentComposer, Supervisor};
use parley_llm::{OpenAiCompatProvider, Provider, ProviderConfig};
use parley_mcp::McpServersConfig;
use parley_stream::{
    Memory, MemoryConfig, RedisIdempotencyStore, RedisMemoryStore, RedisStreams,
};
use parley_tools::{
    DetectAndTranslateTool, SpeechClient, SpeechConfig, TextToSpeechTool, Tool, ToolRegistry,
    TranslateTextTool, TrimConfig, TtsDefaults, ValidatingTool,
};
use parley_types::{AgentRules, Settings, ToolRecord};

use crate::channels::{ChannelSender, TwilioWhatsAppSender};
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::{Result, RuntimeError};
use crate::preprocess::{Preprocessor, PreprocessorConfig};
use crate::worker::{StreamWorker, WorkerConfig};

/// Build the shared LLM provider from settings.
pub fn build_provider(settings: &Settings) -> Arc<dyn Provider> {
    let config = ProviderConfig {
        name: settings.llm_provider.clone(),
        base_url: settings.llm_base_url.clone(),
        api_key_env: "OPENAI_API_KEY".into(),
        headers: HashMap::new(),
        timeout: Duration::from_secs(settings.http_timeout_secs),
    };
    match &settings.openai_api_key {
        Some(key) => Arc::new(OpenAiCompatProvider::with_api_key(config, key.clone())),
        None => Arc::new(OpenAiCompatProvider::new(config)),
    }
}

fn speech_client(settings: &Settings) -> Arc<SpeechClient> {
    Arc::new(SpeechClient::new(SpeechConfig {
        transcriptions_url: settings.openai_transcriptions_url.clone(),
        translations_url: settings.openai_translations_url.clone(),
        tts_url: settings.openai_tts_url.clone(),
        api_key: settings.openai_api_key.clone(),
        timeout: Duration::from_secs(settings.http_timeout_secs),
    }))
}

/// Load the optional per-server agent rules document.
pub fn load_agent_rules(settings: &Settings) -> AgentRules {
    let Some(path) = settings.agent_rules_path.as_deref() else {
        return AgentRules::default();
    };
    match std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str::<AgentRules>(&raw).map_err(|e| e.to_string()))
    {
        Ok(rules) => {
            info!(path, servers = rules.servers.len(), "agent rules loaded");
            rules
        }
        Err(e) => {
            warn!(path, error = %e, "agent rules unavailable, using LLM-only categorization");
            AgentRules::default()
        }
    }
}

/// Per-server blacklists from the rules document.
pub fn blacklist_map(rules: &AgentRules) -> HashMap<String, HashSet<String>> {
    rules
        .servers
        .iter()
        .map(|(server, rules)| {
            (
                server.clone(),
                rules.blacklisted_tools.iter().cloned().collect(),
            )
        })
        .collect()
}

/// A tool record for a local in-process tool.
pub fn local_tool_record(tool: &dyn Tool) -> ToolRecord {
    ToolRecord {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        args_schema: tool.parameters(),
        source_server: tool.source_server().to_string(),
    }
}

/// Everything the worker process needs, built once.
pub async fn build_worker(settings: Arc<Settings>) -> Result<Arc<StreamWorker>> {
    info!("worker bootstrap started");

    let streams = RedisStreams::connect(&settings.redis_url).await?;
    let provider = build_provider(&settings);
    let speech = speech_client(&settings);

    let memory: Arc<dyn Memory> = Arc::new(RedisMemoryStore::new(
        streams.clone(),
        MemoryConfig {
            key_prefix: settings.memory_key_prefix.clone(),
            events_max_items: settings.memory_user_events_max_items,
            events_ttl_seconds: settings.memory_user_events_ttl_seconds,
            profile_ttl_seconds: settings.memory_user_profile_ttl_seconds,
            conversation_ttl_seconds: settings.conversation_ttl_seconds(),
        },
    ));

    let rules = load_agent_rules(&settings);
    let blacklists = blacklist_map(&rules);

    // Remote tool discovery; a missing config file means local-only.
    let mcp_path = Path::new(&settings.mcp_config_path);
    let discovered = if mcp_path.is_file() {
        let config = McpServersConfig::load(mcp_path)?;
        parley_mcp::discover_tools(&config, &blacklists).await?
    } else {
        warn!(path = %settings.mcp_config_path, "tool-server config not found, local tools only");
        Vec::new()
    };

    // Local tools. The detect tool is shared with the preprocessor and
    // the TTS tool with the worker's audio-reply path.
    let detect = Arc::new(DetectAndTranslateTool::new(
        provider.clone(),
        settings.llm_model_name.clone(),
    ));
    let translate = Arc::new(TranslateTextTool::new(
        provider.clone(),
        settings.llm_model_name.clone(),
    ));
    let tts = Arc::new(TextToSpeechTool::new(
        speech.clone(),
        TtsDefaults {
            voice: settings.tts_voice.clone(),
            model: settings.tts_model_name.clone(),
            format: settings.tts_format.clone(),
        },
    ));

    let trim = TrimConfig {
        enabled: settings.tool_output_trimming_enabled,
        max_chars: settings.tool_trim_max_chars,
        max_items: settings.tool_trim_max_items,
    };

    // Assemble the registry: everything callable goes through the
    // validation wrapper.
    let mut registry = ToolRegistry::new();
    let mut records: Vec<ToolRecord> = Vec::new();

    for discovered_tool in discovered {
        records.push(discovered_tool.record.clone());
        registry.register(ValidatingTool::wrap(discovered_tool.tool, trim.clone()));
    }

    let local_blacklist = blacklists
        .get(parley_tools::LOCAL_AUDIO_SOURCE)
        .cloned()
        .unwrap_or_default();
    let local_tools: Vec<Arc<dyn Tool>> = vec![detect.clone(), translate, tts.clone()];
    for tool in local_tools {
        if local_blacklist.contains(tool.name()) {
            continue;
        }
        records.push(local_tool_record(tool.as_ref()));
        registry.register(ValidatingTool::wrap(tool, trim.clone()));
    }

    // Supervisor utility tools are not composed into agents.
    registry.register(ValidatingTool::wrap(
        Arc::new(GetCurrentDatetimeTool),
        trim.clone(),
    ));
    registry.register(ValidatingTool::wrap(
        Arc::new(MemoryGetContextTool::new(memory.clone())),
        trim.clone(),
    ));

    info!(tools = records.len(), "bootstrap check | tools loaded");

    // Policy packs, loaded once.
    let policy_packs = settings
        .policy_packs_dir
        .as_deref()
        .map(|dir| parley_agents::policy::load_policy_packs(Path::new(dir)))
        .unwrap_or_default();

    // Compose agents and compile the supervisor.
    let composer = AgentComposer::new(
        provider.clone(),
        settings.llm_model_name.clone(),
        settings.clone(),
        policy_packs,
    );
    let definitions = composer.compose(&records, &rules).await;
    let registry = Arc::new(registry);
    let supervisor = Arc::new(Supervisor::build(
        provider.clone(),
        settings.llm_model_name.clone(),
        registry,
        &definitions,
    )?);

    let preprocessor = Arc::new(Preprocessor::new(
        speech,
        detect,
        PreprocessorConfig {
            twilio_account_sid: settings.twilio_account_sid.clone(),
            twilio_auth_token: settings.twilio_auth_token.clone(),
            stt_model: settings.stt_model_name.clone(),
            force_english_transcript: settings.openai_stt_force_english,
        },
    ));

    let worker = StreamWorker::new(
        Arc::new(streams),
        supervisor,
        preprocessor,
        memory,
        Some(tts),
        WorkerConfig {
            inbound_stream: settings.redis_stream_inbound.clone(),
            group: settings.redis_consumer_group.clone(),
            consumer: settings.redis_consumer_name.clone(),
            outbound_stream: settings.redis_stream_outbound.clone(),
            max_concurrency: settings.worker_max_concurrency,
            consume_count: settings.consume_count,
            consume_block_ms: settings.consume_block_ms,
            reply_with_audio: settings.reply_with_audio_when_inbound_has_audio,
            media_root_dir: settings.media_root_dir.clone().into(),
            media_public_base: settings.media_base().to_string(),
        },
    );

    info!(
        agents = definitions.agents.len(),
        "worker bootstrap complete"
    );
    Ok(worker)
}

/// Everything the dispatcher process needs, built once.
pub async fn build_dispatcher(settings: Arc<Settings>) -> Result<Arc<Dispatcher>> {
    info!("dispatcher bootstrap started");

    let streams = RedisStreams::connect(&settings.redis_url).await?;
    let idempotency = Arc::new(RedisIdempotencyStore::new(
        streams.clone(),
        settings.outbound_idempotency_ttl_seconds,
    ));

    let sender: Arc<dyn ChannelSender> = Arc::new(
        TwilioWhatsAppSender::new(
            settings.twilio_account_sid.clone(),
            settings.twilio_auth_token.clone(),
            settings.twilio_whatsapp_from.clone(),
        )
        .map_err(RuntimeError::Channel)?,
    );

    let dispatcher = Dispatcher::new(
        Arc::new(streams),
        idempotency,
        vec![sender],
        DispatcherConfig {
            outbound_stream: settings.redis_stream_outbound.clone(),
            group: settings.redis_outbound_consumer_group.clone(),
            consumer: settings.redis_outbound_consumer_name.clone(),
            max_concurrency: settings.outbound_max_concurrency,
            consume_count: settings.consume_count,
            consume_block_ms: settings.consume_block_ms,
        },
    );

    info!("dispatcher bootstrap complete");
    Ok(dispatcher)
}
