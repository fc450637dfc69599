//! Filesystem layout and environment overrides.
//!
//! ```text
//! <home>/.formation/
//!   state/
//!     <namespace>/
//!       <name>.json          (last-applied state, mode 0600)
//! <home>/.orchestrator/
//!   runtime.json             (runtime config, owned by the orchestrator)
//! ```
//!
//! Every function that touches the layout takes an explicit `home`; tests
//! pass a `TempDir` and never resolve the real home directory.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::FormationError;

/// Overrides the home directory used as the root of every default path.
pub const HOME_ENV: &str = "FORMATION_HOME";
/// Overrides the runtime config document path.
pub const RUNTIME_CONFIG_ENV: &str = "FORMATION_RUNTIME_CONFIG";
/// Overrides the gateway RPC timeout, in milliseconds.
pub const GATEWAY_TIMEOUT_ENV: &str = "FORMATION_GATEWAY_TIMEOUT_MS";

pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve the home directory: `$FORMATION_HOME`, else `dirs::home_dir()`.
pub fn home() -> Result<PathBuf, FormationError> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir().ok_or(FormationError::HomeNotFound)
}

pub fn formation_root(home: &Path) -> PathBuf {
    home.join(".formation")
}

pub fn state_root(home: &Path) -> PathBuf {
    formation_root(home).join("state")
}

/// `<home>/.formation/state/<namespace>/<name>.json`. Pure, no I/O.
pub fn state_path_at(home: &Path, namespace: &str, name: &str) -> PathBuf {
    state_root(home).join(namespace).join(format!("{name}.json"))
}

/// Runtime config path: `$FORMATION_RUNTIME_CONFIG`, else
/// `<home>/.orchestrator/runtime.json`.
pub fn runtime_config_path_at(home: &Path) -> PathBuf {
    match std::env::var_os(RUNTIME_CONFIG_ENV).filter(|v| !v.is_empty()) {
        Some(path) => PathBuf::from(path),
        None => default_runtime_config_path_at(home),
    }
}

pub fn default_runtime_config_path_at(home: &Path) -> PathBuf {
    home.join(".orchestrator").join("runtime.json")
}

/// Whether `rel` is a non-empty path made only of normal components: no
/// root, prefix, `.` or `..`.
pub fn is_plain_relative(rel: &str) -> bool {
    let path = Path::new(rel);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// `root/rel`, refusing any `rel` that could resolve outside `root`.
pub fn join_relative(root: &Path, rel: &str) -> Result<PathBuf, FormationError> {
    if is_plain_relative(rel) {
        Ok(root.join(rel))
    } else {
        Err(FormationError::UnsafePath {
            path: rel.to_string(),
        })
    }
}

/// RPC timeout from `$FORMATION_GATEWAY_TIMEOUT_MS`, else five seconds.
pub fn gateway_timeout() -> Duration {
    std::env::var(GATEWAY_TIMEOUT_ENV)
        .ok()
        .and_then(|raw| parse_timeout_ms(&raw))
        .unwrap_or(DEFAULT_GATEWAY_TIMEOUT)
}

/// Parse a millisecond timeout. Unparseable or zero values yield `None`.
pub fn parse_timeout_ms(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}
