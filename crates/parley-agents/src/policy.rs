//! Policy packs.
//!
//! A policy pack is a JSON rule document that injects stable guidance
//! into generated agent system messages for matching source servers
//! (wildcard `*` allowed). Packs are loaded once at bootstrap and
//! applied as: prepends + original + appends.

use std::path::Path;

use parley_types::{AgentDefinition, PolicyPack};
use tracing::{info, warn};

/// Load every `*.json` pack in a directory, sorted by file name.
///
/// A missing directory or an unreadable pack is logged and skipped;
/// policy packs are optional by design.
pub fn load_policy_packs(dir: &Path) -> Vec<PolicyPack> {
    let mut packs = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            warn!(path = %dir.display(), "policy packs dir not found");
            return packs;
        }
    };

    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    for path in paths {
        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<PolicyPack>(&raw).map_err(|e| e.to_string()))
        {
            Ok(pack) => packs.push(pack),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to load policy pack"),
        }
    }

    info!(count = packs.len(), path = %dir.display(), "policy packs loaded");
    packs
}

/// Apply matching packs to one agent definition.
///
/// Returns the applied pack ids, for logging. Merge order is: all
/// prepends (in pack order), the original message, all appends.
pub fn apply_policy_packs(agent: &mut AgentDefinition, packs: &[PolicyPack]) -> Vec<String> {
    let mut applied = Vec::new();
    let mut prepends: Vec<String> = Vec::new();
    let mut appends: Vec<String> = Vec::new();

    for pack in packs {
        if !pack.matches(&agent.source_server) {
            continue;
        }
        if let Some(pre) = &pack.inject.prepend_system_message {
            let pre = pre.trim();
            if !pre.is_empty() {
                prepends.push(pre.to_string());
            }
        }
        for line in &pack.inject.append_system_message {
            let line = line.trim_end();
            if !line.is_empty() {
                appends.push(line.to_string());
            }
        }
        applied.push(pack.id.clone());
    }

    if applied.is_empty() {
        return applied;
    }

    let mut chunks: Vec<String> = prepends;
    chunks.push(agent.system_message.trim().to_string());
    if !appends.is_empty() {
        chunks.push(appends.join("\n"));
    }
    agent.system_message = chunks
        .into_iter()
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    applied
}
