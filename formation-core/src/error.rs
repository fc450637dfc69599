//! Error types for formation-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from state, manifest, and runtime-config handling.
#[derive(Debug, Error)]
pub enum FormationError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON parse error on load, with the file path.
    #[error("failed to parse JSON at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// YAML parse error on manifest load, with the file path.
    #[error("failed to parse YAML at {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Serialization failure on the write path.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// No last-applied state record exists for the formation.
    #[error("formation {namespace}/{name} is not installed")]
    NotInstalled { namespace: String, name: String },

    /// The state record loaded but violates a structural invariant.
    #[error("invalid state record for {namespace}/{name}: {reason}")]
    InvalidState {
        namespace: String,
        name: String,
        reason: String,
    },

    /// The runtime config document has an unexpected shape at a touched path.
    #[error("invalid runtime config ({location}): {reason}")]
    InvalidConfig { location: String, reason: String },

    /// A tracked relative path that would leave its root directory.
    #[error("unsafe relative path '{path}'")]
    UnsafePath { path: String },

    /// The interpolation token pattern failed to compile.
    #[error("template pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// `dirs::home_dir()` returned `None` and `FORMATION_HOME` is unset.
    #[error("cannot determine home directory; set $HOME or $FORMATION_HOME")]
    HomeNotFound,
}

/// Convenience constructor for [`FormationError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> FormationError {
    FormationError::Io {
        path: path.into(),
        source,
    }
}
