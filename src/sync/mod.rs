// ABOUTME: Incremental synchronization of the knowledge store with its source table
// ABOUTME: Change analysis, strategy policy, execution, fingerprint cache, and watcher

pub mod analyzer;
pub mod cache;
pub mod engine;
pub mod executor;
pub mod policy;
pub mod watcher;

pub use analyzer::{analyze_changes, AnalyzedRow, ChangeReport};
pub use cache::{FingerprintCache, LoadedCache};
pub use engine::{ChangeCounts, CycleReport, SyncEngine};
pub use executor::{ExecutionOutcome, SmokeTest, SyncExecutor, Validation};
pub use policy::{SyncDecision, SyncPolicy, SyncStrategy, DEFAULT_CHANGE_THRESHOLD};
pub use watcher::{SourceWatcher, WatcherState, WatcherStatus};
