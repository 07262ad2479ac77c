// ABOUTME: FingerprintCache - durable identity-to-fingerprint map of synced rows
// ABOUTME: Side-car JSON file next to the source table, replaced atomically on save

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::fingerprint::{RowFingerprint, RowIdentity};

const CACHE_VERSION: u32 = 1;

/// Record of the rows already synchronized to the store.
///
/// After a successful sync the entries equal exactly the fingerprint set of
/// the current source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FingerprintCache {
    /// Version of the file format
    pub version: u32,
    /// When the cache last matched the store
    pub synced_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Identity -> content fingerprint
    pub entries: BTreeMap<RowIdentity, RowFingerprint>,
}

/// Result of loading a cache file.
#[derive(Debug)]
pub struct LoadedCache {
    pub cache: FingerprintCache,
    /// The file existed but could not be parsed and was discarded.
    pub was_reset: bool,
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self {
            version: CACHE_VERSION,
            synced_at: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &RowIdentity) -> Option<&RowFingerprint> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &RowIdentity) -> bool {
        self.entries.contains_key(id)
    }

    pub fn insert(&mut self, id: RowIdentity, fingerprint: RowFingerprint) {
        self.entries.insert(id, fingerprint);
    }

    pub fn remove(&mut self, id: &RowIdentity) -> Option<RowFingerprint> {
        self.entries.remove(id)
    }

    pub fn identities(&self) -> impl Iterator<Item = &RowIdentity> {
        self.entries.keys()
    }

    /// Stamp the cache as matching the store as of now.
    pub fn mark_synced(&mut self) {
        self.synced_at = Some(chrono::Utc::now());
    }

    /// Load the cache, resetting to empty when the file is absent or corrupt.
    ///
    /// A reset is never an error: the next analysis classifies every row as
    /// new and the store is rebuilt once.
    pub fn load_or_reset(path: &Path) -> LoadedCache {
        if !path.exists() {
            tracing::info!("No fingerprint cache at {:?}; starting empty", path);
            return LoadedCache {
                cache: Self::new(),
                was_reset: false,
            };
        }

        match Self::load(path) {
            Ok(cache) => {
                tracing::info!(
                    "Loaded fingerprint cache from {:?} ({} entries)",
                    path,
                    cache.len()
                );
                LoadedCache {
                    cache,
                    was_reset: false,
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Fingerprint cache {:?} is corrupt: {:#}. Resetting to empty.",
                    path,
                    e
                );
                LoadedCache {
                    cache: Self::new(),
                    was_reset: true,
                }
            }
        }
    }

    /// Load the cache from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fingerprint cache from {:?}", path))?;
        let cache: FingerprintCache = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse fingerprint cache from {:?}", path))?;
        if cache.version != CACHE_VERSION {
            anyhow::bail!(
                "Unsupported fingerprint cache version {} (expected {})",
                cache.version,
                CACHE_VERSION
            );
        }
        Ok(cache)
    }

    /// Rewrite the whole cache file.
    ///
    /// Writes to a temporary file in the same directory and renames it over
    /// the target, so readers see either the old or the new cache.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory {:?}", dir))?;

        let contents =
            serde_json::to_vec_pretty(self).context("Failed to serialize fingerprint cache")?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temporary cache file in {:?}", dir))?;
        tmp.write_all(&contents)
            .context("Failed to write temporary cache file")?;
        tmp.as_file()
            .sync_all()
            .context("Failed to flush temporary cache file")?;
        tmp.persist(path)
            .with_context(|| format!("Failed to move fingerprint cache into {:?}", path))?;

        tracing::debug!("Saved fingerprint cache to {:?} ({} entries)", path, self.len());
        Ok(())
    }

    /// Default cache location: `<table file name>.fingerprints.json` beside the table.
    pub fn default_path(source: &Path) -> PathBuf {
        sidecar_path(source, "fingerprints.json")
    }
}

/// Path next to `source` named `<source file name>.<suffix>`.
pub(crate) fn sidecar_path(source: &Path, suffix: &str) -> PathBuf {
    let mut name = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "knowledge".into());
    name.push(".");
    name.push(suffix);
    source.with_file_name(name)
}
