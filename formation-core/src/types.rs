//! Shared identifier newtypes.
//!
//! Agents are addressed two ways: by the *slug* a manifest declares
//! (`lead`, `worker`) and by the *id* the runtime config knows them under
//! (`acme-lead`). The two never mix, so each gets its own type.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// The manifest-local name of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentSlug(pub String);

impl AgentSlug {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AgentSlug {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentSlug {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Borrow<str> for AgentSlug {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The runtime-config identifier of an installed agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Borrow<str> for AgentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Naming conventions
// ---------------------------------------------------------------------------

/// Runtime id for `slug` installed under `namespace`: `"{namespace}-{slug}"`.
pub fn agent_id(namespace: &str, slug: &AgentSlug) -> AgentId {
    AgentId(format!("{namespace}-{slug}"))
}

/// `slug → agentId` for every slug, as the planner consumes it.
pub fn agent_id_map<'a, I>(namespace: &str, slugs: I) -> BTreeMap<AgentSlug, AgentId>
where
    I: IntoIterator<Item = &'a AgentSlug>,
{
    slugs
        .into_iter()
        .map(|slug| (slug.clone(), agent_id(namespace, slug)))
        .collect()
}

/// The agent-to-agent allow pattern owned by `namespace`: `"{namespace}-*"`.
pub fn namespace_pattern(namespace: &str) -> String {
    format!("{namespace}-*")
}

/// Key of a tracked file in `fileHashes`: `"{agentId}:{relPath}"`.
pub fn file_hash_key(agent_id: &AgentId, rel_path: &str) -> String {
    format!("{agent_id}:{rel_path}")
}

/// Split a `fileHashes` key back into `(agent id, relative path)`.
///
/// Agent ids never contain `:`, so the first separator wins.
pub fn split_file_hash_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
