//! Error types for formation-sync.

use std::path::PathBuf;

use thiserror::Error;

use formation_core::FormationError;
use formation_gateway::GatewayError;

/// All errors that can arise from planning, diffing, and repair workflows.
#[derive(Debug, Error)]
pub enum SyncError {
    /// State, manifest, or runtime-config failure.
    #[error(transparent)]
    Core(#[from] FormationError),

    /// Gateway failure that is not a plain "unreachable".
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest names an agent whose source directory does not exist.
    #[error("source directory for agent '{slug}' not found at {path}")]
    SourceDirMissing { slug: String, path: PathBuf },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
