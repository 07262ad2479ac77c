// ABOUTME: SyncExecutor - applies a sync decision to the knowledge store
// ABOUTME: Incremental upsert/delete with same-cycle fallback to a full rebuild

use anyhow::Result;

use super::analyzer::{cache_from_rows, AnalyzedRow, ChangeReport};
use super::cache::FingerprintCache;
use super::policy::{SyncDecision, SyncStrategy};
use crate::error::SyncError;
use crate::store::{KnowledgeDocument, KnowledgeStore, LoadOptions};

/// Query issued against the store after every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeTest {
    pub query: String,
    pub limit: usize,
}

impl Default for SmokeTest {
    fn default() -> Self {
        Self {
            query: "help".to_string(),
            limit: 1,
        }
    }
}

/// Result of the post-sync smoke test. Never fails a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// No store write happened, or the source is empty.
    NotRun,
    Passed { hits: usize },
    /// The store answered with nothing.
    NoResults,
    /// The search call itself errored.
    Errored(String),
}

impl Validation {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Validation::NoResults | Validation::Errored(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Strategy chosen by the policy
    pub requested: SyncStrategy,
    /// Strategy that actually completed
    pub applied: SyncStrategy,
    pub upserted: u64,
    pub deleted: u64,
    /// Rows written by a full rebuild
    pub reindexed: u64,
    /// Current rows that did not need re-embedding
    pub embeddings_saved: usize,
    pub validation: Validation,
}

impl ExecutionOutcome {
    fn new(requested: SyncStrategy) -> Self {
        Self {
            requested,
            applied: requested,
            upserted: 0,
            deleted: 0,
            reindexed: 0,
            embeddings_saved: 0,
            validation: Validation::NotRun,
        }
    }

    pub fn fell_back_to_full(&self) -> bool {
        self.requested == SyncStrategy::Incremental && self.applied == SyncStrategy::Full
    }
}

/// Applies decisions to a store and keeps the in-memory cache in step.
///
/// The cache is only modified after the store confirms a write. Persisting the
/// cache is the caller's job.
pub struct SyncExecutor<'a, S: KnowledgeStore + ?Sized> {
    store: &'a mut S,
    smoke_test: &'a SmokeTest,
}

impl<'a, S: KnowledgeStore + ?Sized> SyncExecutor<'a, S> {
    pub fn new(store: &'a mut S, smoke_test: &'a SmokeTest) -> Self {
        Self { store, smoke_test }
    }

    pub fn execute(
        &mut self,
        decision: &SyncDecision,
        cache: &mut FingerprintCache,
    ) -> Result<ExecutionOutcome, SyncError> {
        let report = &decision.report;
        let mut outcome = ExecutionOutcome::new(decision.strategy);

        match decision.strategy {
            SyncStrategy::Skip => {
                outcome.embeddings_saved = report.total_rows;
                tracing::debug!("No changes; skipping store update");
                return Ok(outcome);
            }
            SyncStrategy::Incremental => match self.apply_incremental(report) {
                Ok((upserted, deleted)) => {
                    for row in report.rows_to_upsert() {
                        cache.insert(row.id.clone(), row.fingerprint.clone());
                    }
                    for id in &report.deleted {
                        cache.remove(id);
                    }
                    cache.mark_synced();
                    outcome.upserted = upserted;
                    outcome.deleted = deleted;
                    outcome.embeddings_saved = report.unchanged.len();
                    tracing::info!(
                        "Incremental sync applied: {} upserted, {} deleted, {} rows left untouched",
                        upserted,
                        deleted,
                        report.unchanged.len()
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Incremental sync failed: {:#}. Falling back to full rebuild.",
                        e
                    );
                    outcome.applied = SyncStrategy::Full;
                    outcome.reindexed = self.apply_full(report, cache)?;
                }
            },
            SyncStrategy::Full => {
                outcome.reindexed = self.apply_full(report, cache)?;
            }
        }

        outcome.validation = if report.total_rows == 0 {
            Validation::NotRun
        } else {
            self.smoke_test()
        };
        Ok(outcome)
    }

    fn apply_incremental(&mut self, report: &ChangeReport) -> Result<(u64, u64)> {
        let documents = documents(report.rows_to_upsert());
        let upserted = if documents.is_empty() {
            0
        } else {
            self.store.load(&documents, LoadOptions::upsert())?
        };
        let deleted = if report.deleted.is_empty() {
            0
        } else {
            self.store.delete(&report.deleted)?
        };
        Ok((upserted, deleted))
    }

    /// Recreate the store from every current row and rebuild the cache.
    ///
    /// On failure the cache is left exactly as it was; a partially applied
    /// rebuild is never adopted as the new baseline.
    fn apply_full(
        &mut self,
        report: &ChangeReport,
        cache: &mut FingerprintCache,
    ) -> Result<u64, SyncError> {
        let documents = documents(report.current_rows());
        let written = self
            .store
            .load(&documents, LoadOptions::recreate())
            .map_err(SyncError::StoreRebuildFailure)?;

        let mut rebuilt = cache_from_rows(report.current_rows());
        rebuilt.mark_synced();
        *cache = rebuilt;

        tracing::info!("Full rebuild applied: {} rows reindexed", written);
        Ok(written)
    }

    fn smoke_test(&self) -> Validation {
        match self
            .store
            .search(&self.smoke_test.query, self.smoke_test.limit)
        {
            Ok(hits) if hits.is_empty() => {
                tracing::warn!(
                    "Smoke test query {:?} returned no results after sync",
                    self.smoke_test.query
                );
                Validation::NoResults
            }
            Ok(hits) => Validation::Passed { hits: hits.len() },
            Err(e) => {
                tracing::warn!("Smoke test query failed after sync: {:#}", e);
                Validation::Errored(format!("{:#}", e))
            }
        }
    }
}

fn documents<'r>(rows: impl Iterator<Item = &'r AnalyzedRow>) -> Vec<KnowledgeDocument> {
    rows.map(AnalyzedRow::to_document).collect()
}
