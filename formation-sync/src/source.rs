//! Formation source trees: file discovery, rendering, and hashing.
//!
//! A source tree is the directory holding a manifest plus each agent's
//! `sourceDir`. Rendering applies `{{VAR}}` interpolation to text files and
//! copies binary files verbatim; hashes are taken over the rendered bytes,
//! which is what ends up in an agent workspace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use formation_core::hash::sha256_hex;
use formation_core::interpolate::env_placeholder;
use formation_core::manifest::load_manifest;
use formation_core::paths::join_relative;
use formation_core::types::file_hash_key;
use formation_core::{AgentId, AgentSlug, Interpolator, LastAppliedState, Manifest};

use crate::error::{io_err, SyncError};

/// A manifest together with the directory its `sourceDir`s are relative to.
#[derive(Debug, Clone)]
pub struct RepairSource {
    pub root: PathBuf,
    pub manifest: Manifest,
}

impl RepairSource {
    /// Load the manifest at `manifest_path`; its parent is the source root.
    pub fn load(manifest_path: &Path) -> Result<Self, SyncError> {
        let manifest = load_manifest(manifest_path)?;
        let root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self { root, manifest })
    }

    /// Accept either a manifest file or a directory holding `formation.yaml`.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if path.is_dir() {
            Self::load(&path.join(formation_core::manifest::MANIFEST_FILE))
        } else {
            Self::load(path)
        }
    }

    /// Absolute source directory of `slug`, if the manifest declares it.
    pub fn agent_dir(&self, slug: &AgentSlug) -> Option<PathBuf> {
        self.manifest
            .agents
            .get(slug)
            .map(|agent| self.root.join(&agent.source_dir))
    }

    /// Render one file of `slug`. `Ok(None)` when the source has no such file.
    pub fn render_file(
        &self,
        slug: &AgentSlug,
        rel_path: &str,
        interpolator: &Interpolator,
    ) -> Result<Option<Vec<u8>>, SyncError> {
        let Some(dir) = self.agent_dir(slug) else {
            return Ok(None);
        };
        let path = join_relative(&dir, rel_path)?;
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
        Ok(Some(interpolator.render_bytes(&raw)))
    }
}

/// Every regular file under `dir`, as sorted `/`-separated relative paths.
pub fn list_agent_files(dir: &Path) -> Result<Vec<String>, SyncError> {
    let mut files = Vec::new();
    walk(dir, dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), SyncError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
        if file_type.is_dir() {
            walk(root, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(rel) = path.strip_prefix(root) {
                let parts: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(parts.join("/"));
            }
        }
    }
    Ok(())
}

/// Render every file of `slug` from its source directory.
pub fn render_agent_files(
    source: &RepairSource,
    slug: &AgentSlug,
    interpolator: &Interpolator,
) -> Result<BTreeMap<String, Vec<u8>>, SyncError> {
    let dir = source.agent_dir(slug).ok_or_else(|| SyncError::SourceDirMissing {
        slug: slug.to_string(),
        path: source.root.clone(),
    })?;
    if !dir.is_dir() {
        return Err(SyncError::SourceDirMissing {
            slug: slug.to_string(),
            path: dir,
        });
    }
    let mut rendered = BTreeMap::new();
    for rel in list_agent_files(&dir)? {
        let path = dir.join(&rel);
        let raw = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
        rendered.insert(rel, interpolator.render_bytes(&raw));
    }
    Ok(rendered)
}

/// Candidate `fileHashes` for the whole source tree: `"{agentId}:{relPath}"`
/// to the SHA-256 of the rendered bytes.
pub fn compute_file_hashes(
    source: &RepairSource,
    agent_ids: &BTreeMap<AgentSlug, AgentId>,
    interpolator: &Interpolator,
) -> Result<BTreeMap<String, String>, SyncError> {
    let mut hashes = BTreeMap::new();
    for (slug, id) in agent_ids {
        for (rel, bytes) in render_agent_files(source, slug, interpolator)? {
            hashes.insert(file_hash_key(id, &rel), sha256_hex(&bytes));
        }
    }
    tracing::debug!(files = hashes.len(), "computed candidate file hashes");
    Ok(hashes)
}

/// Resolve the manifest's declared variables.
///
/// Precedence: the value recorded in `state` (a `"$NAME"` placeholder reads
/// `NAME` through `env`), then `env` under the variable's own name, then the
/// declared default. Unresolvable variables are left out, so their tokens
/// render verbatim.
pub fn resolve_variables<F>(
    manifest: &Manifest,
    state: Option<&LastAppliedState>,
    env: F,
) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut resolved = BTreeMap::new();
    for (name, decl) in &manifest.variables {
        let recorded = state
            .and_then(|s| s.variables.get(name))
            .and_then(|value| match env_placeholder(value) {
                Some(env_name) => env(env_name),
                None => Some(value.clone()),
            });
        let value = recorded
            .or_else(|| env(name))
            .or_else(|| decl.default.clone());
        match value {
            Some(value) => {
                resolved.insert(name.clone(), value);
            }
            None if decl.required => {
                tracing::warn!(variable = %name, "required variable has no value");
            }
            None => {}
        }
    }
    resolved
}
