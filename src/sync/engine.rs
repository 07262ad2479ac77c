// ABOUTME: SyncEngine - runs one synchronization cycle end to end
// ABOUTME: Reads the source, analyzes, decides, executes, and persists the cache

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::analyzer::{analyze_changes, ChangeReport};
use super::cache::FingerprintCache;
use super::executor::{ExecutionOutcome, SmokeTest, SyncExecutor, Validation};
use super::policy::{SyncDecision, SyncPolicy, SyncStrategy};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::source::SourceTable;
use crate::store::KnowledgeStore;

/// Row counts of a change report, without the rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub total_rows: usize,
    pub duplicates: usize,
}

impl From<&ChangeReport> for ChangeCounts {
    fn from(report: &ChangeReport) -> Self {
        Self {
            new: report.new.len(),
            changed: report.changed.len(),
            unchanged: report.unchanged.len(),
            deleted: report.deleted.len(),
            total_rows: report.total_rows,
            duplicates: report.duplicates,
        }
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub changes: ChangeCounts,
    pub outcome: ExecutionOutcome,
    /// The cache file was corrupt at startup and this cycle rebuilt it
    pub cache_reset: bool,
    /// The store was updated but the cache file could not be rewritten
    pub cache_save_failed: bool,
    /// Cache entries after the cycle
    pub cache_entries: usize,
    pub duration: Duration,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl CycleReport {
    pub fn strategy(&self) -> SyncStrategy {
        self.outcome.applied
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.changes;
        writeln!(
            f,
            "Changes:   {} rows ({} new, {} changed, {} unchanged, {} deleted)",
            c.total_rows, c.new, c.changed, c.unchanged, c.deleted
        )?;
        if self.outcome.fell_back_to_full() {
            writeln!(f, "Strategy:  full (incremental write failed)")?;
        } else {
            writeln!(f, "Strategy:  {}", self.outcome.applied)?;
        }
        writeln!(
            f,
            "Store:     {} upserted, {} deleted, {} reindexed, {} embeddings saved",
            self.outcome.upserted,
            self.outcome.deleted,
            self.outcome.reindexed,
            self.outcome.embeddings_saved
        )?;
        let validation = match &self.outcome.validation {
            Validation::NotRun => "not run".to_string(),
            Validation::Passed { hits } => format!("ok ({} hits)", hits),
            Validation::NoResults => "no results (anomaly)".to_string(),
            Validation::Errored(e) => format!("error: {}", e),
        };
        writeln!(f, "Smoke test: {}", validation)?;
        write!(
            f,
            "Cache:     {} entries{}{} ({}ms)",
            self.cache_entries,
            if self.cache_reset { ", rebuilt after corruption" } else { "" },
            if self.cache_save_failed { ", NOT SAVED" } else { "" },
            self.duration.as_millis()
        )
    }
}

/// Owns the store and fingerprint cache for one source table.
///
/// Only one cycle can run at a time because `run_cycle` takes `&mut self`;
/// callers that share an engine across threads wrap it in a mutex.
pub struct SyncEngine<S: KnowledgeStore> {
    source: SourceTable,
    store: S,
    cache: FingerprintCache,
    cache_path: PathBuf,
    policy: SyncPolicy,
    smoke_test: SmokeTest,
    cache_reset_pending: bool,
}

impl<S: KnowledgeStore> SyncEngine<S> {
    /// Create an engine, loading the cache from `cache_path` or starting empty.
    pub fn new(
        source: SourceTable,
        store: S,
        cache_path: PathBuf,
        policy: SyncPolicy,
        smoke_test: SmokeTest,
    ) -> Self {
        let loaded = FingerprintCache::load_or_reset(&cache_path);
        Self {
            source,
            store,
            cache: loaded.cache,
            cache_path,
            policy,
            smoke_test,
            cache_reset_pending: loaded.was_reset,
        }
    }

    pub fn from_config(config: &SyncConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            SourceTable::new(config.source_path()?),
            store,
            config.cache_path()?,
            config.policy(),
            config.smoke_test(),
        ))
    }

    pub fn source(&self) -> &SourceTable {
        &self.source
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Classify the current source and pick a strategy without touching the store.
    pub fn plan(&self) -> Result<SyncDecision, SyncError> {
        let rows = self.source.read_rows()?;
        Ok(self.policy.decide(analyze_changes(rows, &self.cache)))
    }

    /// Run one full cycle: read, analyze, decide, execute, persist.
    pub fn run_cycle(&mut self) -> Result<CycleReport, SyncError> {
        let decision = self.plan()?;
        self.apply(decision)
    }

    /// Execute a planned decision and persist the cache when it changed.
    pub fn apply(&mut self, decision: SyncDecision) -> Result<CycleReport, SyncError> {
        let start = Instant::now();
        let changes = ChangeCounts::from(&decision.report);

        tracing::info!(
            "Change analysis for {}: {} -> {}",
            self.source.path().display(),
            decision.report,
            decision.strategy
        );

        let outcome = SyncExecutor::new(&mut self.store, &self.smoke_test)
            .execute(&decision, &mut self.cache)?;

        let cache_reset = self.cache_reset_pending;
        let mut cache_save_failed = false;
        if outcome.applied != SyncStrategy::Skip || self.cache_reset_pending {
            match self.cache.save(&self.cache_path) {
                Ok(()) => self.cache_reset_pending = false,
                Err(e) => {
                    // The in-memory cache matches the store; the next successful
                    // save repairs the file.
                    tracing::warn!("Failed to save fingerprint cache: {:#}", e);
                    cache_save_failed = true;
                }
            }
        }

        let report = CycleReport {
            changes,
            outcome,
            cache_reset,
            cache_save_failed,
            cache_entries: self.cache.len(),
            duration: start.elapsed(),
            finished_at: chrono::Utc::now(),
        };

        tracing::info!(
            "Sync cycle finished in {}ms: {} ({} cache entries)",
            report.duration.as_millis(),
            report.outcome.applied,
            report.cache_entries
        );
        Ok(report)
    }
}
