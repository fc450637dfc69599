//! SHA-256 content hashing over raw bytes, lower-case hex.
//!
//! No line-ending normalisation: the digest must match exactly what sits on
//! disk, binary files included.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{io_err, FormationError};

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hex SHA-256 of the file at `path`.
pub fn hash_file(path: &Path) -> Result<String, FormationError> {
    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    Ok(sha256_hex(&bytes))
}
