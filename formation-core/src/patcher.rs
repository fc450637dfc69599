//! Structural patches over the runtime config document.
//!
//! Every operation is idempotent and reports whether it changed the
//! document, so callers can gate writes on a dirty flag.

use std::cmp::Ordering;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::FormationError;
use crate::runtime_config::RuntimeConfig;
use crate::state::{StateAgent, StateBinding, Topology};
use crate::types::{namespace_pattern, AgentId};

// ---------------------------------------------------------------------------
// Match objects
// ---------------------------------------------------------------------------

/// Canonicalize a binding match object.
///
/// Drops `null` and empty-string members, drops empty-string (and `null`)
/// array elements and then the array if nothing is left, and recurses into
/// nested objects, dropping them once they are empty. Non-object input is
/// returned unchanged.
pub fn prune_match_object(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(prune_map(map)),
        other => other.clone(),
    }
}

fn prune_map(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        if let Some(kept) = prune_member(value) {
            out.insert(key.clone(), kept);
        }
    }
    out
}

fn prune_member(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::Array(items) => {
            let kept: Vec<Value> = items.iter().filter_map(prune_member).collect();
            (!kept.is_empty()).then_some(Value::Array(kept))
        }
        Value::Object(map) => {
            let pruned = prune_map(map);
            (!pruned.is_empty()).then_some(Value::Object(pruned))
        }
        other => Some(other.clone()),
    }
}

/// Structural equality of two bindings after pruning their match objects.
pub fn same_binding(agent_id: &AgentId, match_: &Value, entry: &Value) -> bool {
    entry.get("agentId").and_then(Value::as_str) == Some(agent_id.as_str())
        && entry
            .get("match")
            .map(|m| prune_match_object(m) == prune_match_object(match_))
            .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Agent entries
// ---------------------------------------------------------------------------

/// A runtime-config `agents.list` entry rebuilt from recorded state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEntry {
    pub id: AgentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub workspace: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Value>,
}

impl AgentEntry {
    /// Rebuild from the cached snapshot. A model is kept only when it is a
    /// plain string; structured model settings are left to the runtime's
    /// defaults.
    pub fn from_state(agent: &StateAgent) -> Self {
        let snapshot = agent.config.clone().unwrap_or_default();
        Self {
            id: agent.id.clone(),
            name: snapshot.name,
            workspace: agent.workspace.clone(),
            model: snapshot
                .model
                .as_ref()
                .and_then(Value::as_str)
                .map(str::to_owned),
            tools: snapshot.tools,
            sandbox: snapshot.sandbox,
            identity: snapshot.identity,
            skills: snapshot.skills,
        }
    }
}

/// Insert `entry` into `agents.list`, replacing any entry with the same id.
pub fn add_agent_entry(
    config: &mut RuntimeConfig,
    entry: &AgentEntry,
) -> Result<bool, FormationError> {
    let value = serde_json::to_value(entry)?;
    let list = config.agent_entries_mut()?;
    let existing = list
        .iter()
        .position(|e| e.get("id").and_then(Value::as_str) == Some(entry.id.as_str()));
    match existing {
        Some(idx) if list[idx] == value => Ok(false),
        Some(idx) => {
            list[idx] = value;
            Ok(true)
        }
        None => {
            list.push(value);
            Ok(true)
        }
    }
}

/// Remove every `agents.list` entry with `id`.
pub fn remove_agent_entry(
    config: &mut RuntimeConfig,
    id: &AgentId,
) -> Result<bool, FormationError> {
    if !config.has_agent(id.as_str()) {
        return Ok(false);
    }
    let list = config.agent_entries_mut()?;
    let before = list.len();
    list.retain(|e| e.get("id").and_then(Value::as_str) != Some(id.as_str()));
    Ok(list.len() != before)
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

pub fn has_binding(config: &RuntimeConfig, binding: &StateBinding) -> bool {
    config
        .bindings()
        .iter()
        .any(|entry| same_binding(&binding.agent_id, &binding.match_, entry))
}

/// Append `binding` (with a pruned match) unless a structurally equal one
/// is already present.
pub fn add_binding(
    config: &mut RuntimeConfig,
    binding: &StateBinding,
) -> Result<bool, FormationError> {
    if has_binding(config, binding) {
        return Ok(false);
    }
    let mut entry = Map::new();
    entry.insert("agentId".to_string(), Value::String(binding.agent_id.0.clone()));
    entry.insert("match".to_string(), prune_match_object(&binding.match_));
    config.bindings_mut()?.push(Value::Object(entry));
    Ok(true)
}

/// Remove every binding structurally equal to `binding`.
pub fn remove_binding(
    config: &mut RuntimeConfig,
    binding: &StateBinding,
) -> Result<bool, FormationError> {
    if !has_binding(config, binding) {
        return Ok(false);
    }
    let list = config.bindings_mut()?;
    list.retain(|entry| !same_binding(&binding.agent_id, &binding.match_, entry));
    Ok(true)
}

/// Remove every binding routed to `id`. Returns how many were removed.
pub fn remove_bindings_for_agent(
    config: &mut RuntimeConfig,
    id: &AgentId,
) -> Result<usize, FormationError> {
    let targets = |entry: &Value| entry.get("agentId").and_then(Value::as_str) == Some(id.as_str());
    if !config.bindings().iter().any(targets) {
        return Ok(0);
    }
    let list = config.bindings_mut()?;
    let before = list.len();
    list.retain(|entry| !targets(entry));
    Ok(before - list.len())
}

// ---------------------------------------------------------------------------
// Agent-to-agent allow list
// ---------------------------------------------------------------------------

/// Bring `tools.agentToAgent` in line with `namespace`'s declared topology.
///
/// Any source with at least one target ⇒ this namespace's `"{namespace}-*"`
/// pattern is present once and `enabled` is `true`. Otherwise the pattern is
/// removed, other namespaces' patterns stay, and `enabled` becomes `false`
/// only if the allow list ends up empty. The allow list is always sorted.
pub fn recompute_agent_to_agent(
    config: &mut RuntimeConfig,
    namespace: &str,
    topology: Option<&Topology>,
) -> Result<bool, FormationError> {
    let wanted = topology.is_some_and(|t| t.values().any(|targets| !targets.is_empty()));
    apply_namespace_pattern(config, namespace, wanted)
}

/// Ensure `namespace`'s pattern is allowed, whatever its topology.
///
/// Used when the applied edge set is unknown but the pattern was added.
pub fn allow_namespace(
    config: &mut RuntimeConfig,
    namespace: &str,
) -> Result<bool, FormationError> {
    apply_namespace_pattern(config, namespace, true)
}

fn apply_namespace_pattern(
    config: &mut RuntimeConfig,
    namespace: &str,
    wanted: bool,
) -> Result<bool, FormationError> {
    if !wanted && !config.has_agent_to_agent() {
        return Ok(false);
    }
    let pattern = namespace_pattern(namespace);
    let a2a = config.agent_to_agent_mut()?;
    let before = a2a.clone();

    let mut allow: Vec<Value> = a2a
        .get("allow")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    allow.retain(|p| p.as_str() != Some(pattern.as_str()));
    if wanted {
        allow.push(Value::String(pattern));
    }
    allow.sort_by(compare_patterns);

    let now_empty = allow.is_empty();
    a2a.insert("allow".to_string(), Value::Array(allow));
    if wanted {
        a2a.insert("enabled".to_string(), Value::Bool(true));
    } else if now_empty {
        a2a.insert("enabled".to_string(), Value::Bool(false));
    }
    Ok(*a2a != before)
}

fn compare_patterns(a: &Value, b: &Value) -> Ordering {
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.to_string().cmp(&b.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
