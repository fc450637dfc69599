//! Per-formation state records.
//!
//! # Storage layout
//!
//! ```text
//! ~/.formation/
//!   state/
//!     <namespace>/
//!       <name>.json      (one record per formation, mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from [`paths::home`], delegates to `_at`

use std::path::Path;

use crate::atomic::write_atomic;
use crate::error::{io_err, FormationError};
use crate::paths::{self, state_path_at};
use crate::state::LastAppliedState;

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load and validate the record for `namespace/name`.
///
/// Returns `FormationError::NotInstalled` if no record exists,
/// `FormationError::Json` (with path) if the record is malformed, and
/// `FormationError::InvalidState` if it breaks a structural invariant.
pub fn load_at(
    home: &Path,
    namespace: &str,
    name: &str,
) -> Result<LastAppliedState, FormationError> {
    let path = state_path_at(home, namespace, name);
    if !path.exists() {
        return Err(FormationError::NotInstalled {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let state: LastAppliedState =
        serde_json::from_str(&contents).map_err(|source| FormationError::Json {
            path: path.clone(),
            source,
        })?;
    state.validate()?;
    Ok(state)
}

/// `load_at` convenience wrapper.
pub fn load(namespace: &str, name: &str) -> Result<LastAppliedState, FormationError> {
    load_at(&paths::home()?, namespace, name)
}

/// Whether a record exists for `namespace/name`.
pub fn exists_at(home: &Path, namespace: &str, name: &str) -> bool {
    state_path_at(home, namespace, name).exists()
}

// ---------------------------------------------------------------------------
// Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `state` under its own namespace and name.
pub fn save_at(home: &Path, state: &LastAppliedState) -> Result<(), FormationError> {
    let path = state_path_at(home, &state.namespace, &state.name);
    let json = serde_json::to_vec_pretty(state)?;
    write_atomic(&path, &json, true)?;
    tracing::debug!(path = %path.display(), "saved formation state");
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(state: &LastAppliedState) -> Result<(), FormationError> {
    save_at(&paths::home()?, state)
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// Remove the record for `namespace/name`. Returns whether a record existed.
pub fn delete_at(home: &Path, namespace: &str, name: &str) -> Result<bool, FormationError> {
    let path = state_path_at(home, namespace, name);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(&path, err)),
    }
}

/// `delete_at` convenience wrapper.
pub fn delete(namespace: &str, name: &str) -> Result<bool, FormationError> {
    delete_at(&paths::home()?, namespace, name)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
