// ABOUTME: Error taxonomy for a synchronization cycle
// ABOUTME: Only precondition and rebuild failures abort a cycle; the rest are absorbed

use std::path::PathBuf;

use thiserror::Error;

/// Failures that end a synchronization cycle without a successful sync.
///
/// Cache corruption, Incremental write failures and smoke-test anomalies are
/// not represented here: they are recovered inside the cycle and reported as
/// fields of [`crate::sync::CycleReport`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// The source table does not exist. The watcher retries on the next tick.
    #[error("source table {} not found", .0.display())]
    SourceMissing(PathBuf),

    /// The source table exists but could not be read or parsed.
    ///
    /// The cause chain is part of the message, so it is not exposed again
    /// through `source()`.
    #[error("failed to read source table {}: {cause:#}", .path.display())]
    SourceUnreadable { path: PathBuf, cause: anyhow::Error },

    /// The store rejected a full rebuild. The fingerprint cache is untouched.
    #[error("full rebuild of the knowledge store failed: {0:#}")]
    StoreRebuildFailure(anyhow::Error),
}

impl SyncError {
    /// True for failures caused by the source table rather than the store.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SyncError::SourceMissing(_) | SyncError::SourceUnreadable { .. }
        )
    }
}
