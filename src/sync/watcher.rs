// ABOUTME: SourceWatcher - polls the knowledge table and drives sync cycles
// ABOUTME: Background poll thread, single-flight cycles, cooperative stop, status

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};

use super::engine::{CycleReport, SyncEngine};
use super::policy::SyncStrategy;
use crate::error::SyncError;
use crate::source::read_modified_time;
use crate::store::KnowledgeStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// The poll loop is not running.
    Stopped,
    /// Waiting for the next poll.
    Idle,
    /// Reading the source and classifying rows.
    Checking,
    /// Writing to the store.
    Reloading(SyncStrategy),
}

/// Snapshot of the watcher for operators.
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherStatus {
    pub running: bool,
    pub state: WatcherState,
    /// Last time the store was brought in line with the source
    pub last_sync_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Last time a cycle completed, including cycles that skipped
    pub last_check_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Rows currently recorded as synchronized
    pub row_count: usize,
    /// Completed cycles since this watcher was created
    pub cycles: u64,
    pub last_strategy: Option<SyncStrategy>,
    pub last_error: Option<String>,
    /// Source modification time seen by the last cycle
    pub source_modified: Option<SystemTime>,
}

struct Shared<S: KnowledgeStore> {
    source_path: PathBuf,
    /// Held for the whole of a cycle; this is the single-flight guard.
    engine: Mutex<SyncEngine<S>>,
    status: Mutex<WatcherStatus>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: KnowledgeStore> Shared<S> {
    fn set_state(&self, state: WatcherState) {
        lock(&self.status).state = state;
    }

    /// One poll: run a cycle only when the modification time moved.
    fn poll(&self) {
        let modified = match read_modified_time(&self.source_path) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("{}; will retry on next poll", e);
                lock(&self.status).last_error = Some(e.to_string());
                return;
            }
        };

        if lock(&self.status).source_modified == Some(modified) {
            debug!("Source table unchanged since last cycle");
            return;
        }

        let _ = self.run_cycle(Some(modified));
    }

    /// Run one cycle under the engine lock.
    ///
    /// `observed` is the modification time read before the cycle started, so
    /// an edit that lands mid-cycle still triggers the next poll.
    fn run_cycle(&self, observed: Option<SystemTime>) -> Result<CycleReport, SyncError> {
        let mut engine = lock(&self.engine);
        let idle_state = if lock(&self.status).running {
            WatcherState::Idle
        } else {
            WatcherState::Stopped
        };

        self.set_state(WatcherState::Checking);
        let result = engine.plan().and_then(|decision| {
            if decision.strategy != SyncStrategy::Skip {
                self.set_state(WatcherState::Reloading(decision.strategy));
            }
            engine.apply(decision)
        });

        let mut status = lock(&self.status);
        status.state = idle_state;
        match &result {
            Ok(report) => {
                status.cycles += 1;
                status.last_check_at = Some(report.finished_at);
                status.last_sync_at = engine.cache().synced_at;
                status.row_count = engine.cache().len();
                status.last_strategy = Some(report.strategy());
                status.last_error = None;
                status.source_modified = observed;
            }
            Err(e) if e.is_precondition() => {
                warn!("Sync cycle skipped: {}; will retry on next poll", e);
                status.last_error = Some(e.to_string());
            }
            Err(e) => {
                // Failed rebuilds are not retried until the source changes again.
                error!("Sync cycle failed: {}", e);
                status.cycles += 1;
                status.last_error = Some(e.to_string());
                status.source_modified = observed;
            }
        }
        result
    }
}

/// Watches one knowledge table and keeps its store in sync.
///
/// The poll loop runs on its own thread and performs one cycle at a time;
/// [`SourceWatcher::force_sync`] shares the same lock, so a forced cycle waits
/// for an in-flight one instead of interleaving with it.
pub struct SourceWatcher<S: KnowledgeStore + 'static> {
    shared: Arc<Shared<S>>,
    poll_interval: Duration,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: KnowledgeStore + 'static> SourceWatcher<S> {
    pub fn new(engine: SyncEngine<S>, poll_interval: Duration) -> Self {
        let status = WatcherStatus {
            running: false,
            state: WatcherState::Stopped,
            last_sync_at: engine.cache().synced_at,
            last_check_at: None,
            row_count: engine.cache().len(),
            cycles: 0,
            last_strategy: None,
            last_error: None,
            source_modified: None,
        };
        Self {
            shared: Arc::new(Shared {
                source_path: engine.source().path().to_path_buf(),
                engine: Mutex::new(engine),
                status: Mutex::new(status),
            }),
            poll_interval,
            stop_tx: None,
            thread: None,
        }
    }

    /// Start the poll loop. The first poll happens immediately.
    pub fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            bail!("source watcher is already running");
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&self.shared);
        let poll_interval = self.poll_interval;

        {
            let mut status = lock(&shared.status);
            status.running = true;
            status.state = WatcherState::Idle;
        }

        let spawned = thread::Builder::new()
            .name("knowledge-sync-watcher".to_string())
            .spawn(move || {
                info!(
                    source = %shared.source_path.display(),
                    interval_secs = poll_interval.as_secs_f64(),
                    "source watcher started"
                );
                loop {
                    shared.poll();
                    match stop_rx.recv_timeout(poll_interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("source watcher exiting");
            });

        match spawned {
            Ok(handle) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                let mut status = lock(&self.shared.status);
                status.running = false;
                status.state = WatcherState::Stopped;
                Err(e).context("failed to spawn source watcher thread")
            }
        }
    }

    /// Stop the poll loop, letting an in-flight cycle finish first.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("source watcher thread panicked");
            }
        }
        let mut status = lock(&self.shared.status);
        status.running = false;
        status.state = WatcherState::Stopped;
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Run one cycle now, regardless of the modification time.
    pub fn force_sync(&self) -> Result<CycleReport, SyncError> {
        info!("Forced sync requested");
        let observed = read_modified_time(&self.shared.source_path).ok();
        self.shared.run_cycle(observed)
    }

    pub fn status(&self) -> WatcherStatus {
        lock(&self.shared.status).clone()
    }
}

impl<S: KnowledgeStore + 'static> Drop for SourceWatcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceTable;
    use crate::store::SqliteStore;
    use crate::sync::cache::FingerprintCache;
    use crate::sync::executor::SmokeTest;
    use crate::sync::policy::SyncPolicy;
    use std::path::Path;
    use tempfile::tempdir;

    fn watcher_for(source: &Path) -> SourceWatcher<SqliteStore> {
        let engine = SyncEngine::new(
            SourceTable::new(source),
            SqliteStore::open_in_memory().unwrap(),
            FingerprintCache::default_path(source),
            SyncPolicy::default(),
            SmokeTest::default(),
        );
        SourceWatcher::new(engine, Duration::from_millis(20))
    }

    #[test]
    fn test_new_watcher_is_stopped() {
        let dir = tempdir().unwrap();
        let watcher = watcher_for(&dir.path().join("kb.csv"));
        let status = watcher.status();
        assert!(!status.running);
        assert_eq!(status.state, WatcherState::Stopped);
        assert_eq!(status.cycles, 0);
        assert!(status.last_sync_at.is_none());
    }

    #[test]
    fn test_force_sync_updates_status() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("kb.csv");
        std::fs::write(&source, "content\nFirst answer\nSecond answer\n").unwrap();
        let watcher = watcher_for(&source);

        let report = watcher.force_sync().unwrap();
        assert_eq!(report.strategy(), SyncStrategy::Full);

        let status = watcher.status();
        assert_eq!(status.cycles, 1);
        assert_eq!(status.row_count, 2);
        assert_eq!(status.last_strategy, Some(SyncStrategy::Full));
        assert!(status.last_sync_at.is_some());
        assert_eq!(status.state, WatcherState::Stopped);
    }

    #[test]
    fn test_force_sync_missing_source() {
        let dir = tempdir().unwrap();
        let watcher = watcher_for(&dir.path().join("absent.csv"));
        let err = watcher.force_sync().unwrap_err();
        assert!(err.is_precondition());
        assert!(watcher.status().last_error.is_some());
        assert_eq!(watcher.status().cycles, 0);
    }

    #[test]
    fn test_start_twice_fails() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("kb.csv");
        std::fs::write(&source, "content\nAnswer\n").unwrap();
        let mut watcher = watcher_for(&source);
        watcher.start().unwrap();
        assert!(watcher.start().is_err());
        watcher.stop();
        assert!(!watcher.is_running());
        assert!(!watcher.status().running);
    }
}
