//! Atomic file replacement: serialize → `<file>.tmp` sibling → `rename`.
//!
//! The `.tmp` file always lives in the target's directory, so the rename
//! never crosses filesystems.

use std::path::{Path, PathBuf};

use crate::error::{io_err, FormationError};

/// Atomically replace `path` with `bytes`, creating parent directories.
///
/// With `private` set the file is written with mode `0600` (unix only).
pub fn write_atomic(path: &Path, bytes: &[u8], private: bool) -> Result<(), FormationError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }

    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    if private {
        set_file_permissions(&tmp)?;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), FormationError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), FormationError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_and_cleans_tmp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("state.json");
        write_atomic(&path, b"{}", true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
        assert!(!tmp_path(&path).exists(), ".tmp must be gone after rename");
    }

    #[test]
    #[cfg(unix)]
    fn private_files_are_0600() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        write_atomic(&path, b"{}", true).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
