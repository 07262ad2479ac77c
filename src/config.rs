// ABOUTME: Configuration for the knowledge sync engine and watcher
// ABOUTME: Defaults, optional TOML file, and derived side-car paths

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::cache::{sidecar_path, FingerprintCache};
use crate::sync::executor::SmokeTest;
use crate::sync::policy::{SyncPolicy, DEFAULT_CHANGE_THRESHOLD};

/// Settings for one watched knowledge table.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// source = "knowledge.csv"
/// poll_interval_secs = 30
/// change_threshold = 0.4
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Path to the knowledge table
    pub source: Option<PathBuf>,
    /// Seconds between modification-time polls
    pub poll_interval_secs: u64,
    /// Change ratio above which a full rebuild is chosen
    pub change_threshold: f64,
    /// Query for the post-sync smoke test
    pub smoke_query: String,
    /// Result limit for the smoke test query
    pub smoke_limit: usize,
    /// Knowledge store location (default: beside the table)
    pub store_path: Option<PathBuf>,
    /// Fingerprint cache location (default: beside the table)
    pub cache_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let smoke = SmokeTest::default();
        Self {
            source: None,
            poll_interval_secs: 60,
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
            smoke_query: smoke.query,
            smoke_limit: smoke.limit,
            store_path: None,
            cache_path: None,
        }
    }
}

impl SyncConfig {
    /// Load settings from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: SyncConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.is_none() {
            bail!("No source table configured. Use --source or set `source` in the config file.");
        }
        if !(0.0..=1.0).contains(&self.change_threshold) {
            bail!(
                "change_threshold must be between 0 and 1, got {}",
                self.change_threshold
            );
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.smoke_limit == 0 {
            bail!("smoke_limit must be at least 1");
        }
        Ok(())
    }

    pub fn source_path(&self) -> Result<&Path> {
        self.source
            .as_deref()
            .context("No source table configured")
    }

    pub fn cache_path(&self) -> Result<PathBuf> {
        match &self.cache_path {
            Some(path) => Ok(path.clone()),
            None => Ok(FingerprintCache::default_path(self.source_path()?)),
        }
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(sidecar_path(self.source_path()?, "knowledge.sqlite")),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy::new(self.change_threshold)
    }

    pub fn smoke_test(&self) -> SmokeTest {
        SmokeTest {
            query: self.smoke_query.clone(),
            limit: self.smoke_limit,
        }
    }
}
