// ABOUTME: Integration tests for the polling source watcher
// ABOUTME: Detects edits, skips touched files, stops cooperatively, serializes forced syncs

mod common;

use std::time::Duration;

use common::*;
use knowledge_sync::store::SqliteStore;
use knowledge_sync::sync::{SourceWatcher, SyncStrategy, WatcherState};
use tempfile::tempdir;

const POLL: Duration = Duration::from_millis(25);

#[test]
fn test_watcher_syncs_on_start_and_on_edit() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("knowledge.csv");
    let mut rows = entries(4);
    write_table(&source, &rows);

    let engine = engine(&source, SqliteStore::open_in_memory().unwrap());
    let mut watcher = SourceWatcher::new(engine, POLL);
    watcher.start().unwrap();
    assert!(watcher.status().running);

    assert!(wait_until(|| watcher.status().cycles >= 1));
    let status = watcher.status();
    assert_eq!(status.row_count, 4);
    assert_eq!(status.last_strategy, Some(SyncStrategy::Full));

    rows.push(entry(9, "1"));
    write_table(&source, &rows);
    bump_mtime(&source, 5);

    assert!(wait_until(|| watcher.status().row_count == 5));
    assert!(watcher.status().cycles >= 2);
    assert!(watcher.status().last_error.is_none());

    watcher.stop();
    let status = watcher.status();
    assert!(!status.running);
    assert_eq!(status.state, WatcherState::Stopped);
}

#[test]
fn test_unchanged_mtime_does_not_run_cycles() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("knowledge.csv");
    write_table(&source, &entries(2));

    let engine = engine(&source, SqliteStore::open_in_memory().unwrap());
    let mut watcher = SourceWatcher::new(engine, POLL);
    watcher.start().unwrap();
    assert!(wait_until(|| watcher.status().cycles >= 1));

    std::thread::sleep(POLL * 8);
    assert_eq!(watcher.status().cycles, 1);
    watcher.stop();
}

#[test]
fn test_touched_file_resolves_to_skip() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("knowledge.csv");
    write_table(&source, &entries(3));

    let engine = engine(&source, SqliteStore::open_in_memory().unwrap());
    let mut watcher = SourceWatcher::new(engine, POLL);
    watcher.start().unwrap();
    assert!(wait_until(|| watcher.status().cycles >= 1));

    bump_mtime(&source, 30);
    assert!(wait_until(|| watcher.status().cycles >= 2));
    let status = watcher.status();
    assert_eq!(status.last_strategy, Some(SyncStrategy::Skip));
    assert_eq!(status.row_count, 3);
    watcher.stop();
}

#[test]
fn test_missing_source_is_retried() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("knowledge.csv");

    let engine = engine(&source, SqliteStore::open_in_memory().unwrap());
    let mut watcher = SourceWatcher::new(engine, POLL);
    watcher.start().unwrap();

    assert!(wait_until(|| watcher.status().last_error.is_some()));
    assert_eq!(watcher.status().cycles, 0);
    assert!(watcher.status().running);

    write_table(&source, &entries(2));
    assert!(wait_until(|| watcher.status().row_count == 2));
    assert!(watcher.status().last_error.is_none());
    watcher.stop();
}

#[test]
fn test_stop_prevents_further_cycles() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("knowledge.csv");
    let mut rows = entries(2);
    write_table(&source, &rows);

    let engine = engine(&source, SqliteStore::open_in_memory().unwrap());
    let mut watcher = SourceWatcher::new(engine, POLL);
    watcher.start().unwrap();
    assert!(wait_until(|| watcher.status().cycles >= 1));
    watcher.stop();
    let cycles = watcher.status().cycles;

    rows.push(entry(5, "1"));
    write_table(&source, &rows);
    bump_mtime(&source, 5);
    std::thread::sleep(POLL * 6);
    assert_eq!(watcher.status().cycles, cycles);
    assert_eq!(watcher.status().row_count, 2);

    // A stopped watcher can still be forced.
    let report = watcher.force_sync().unwrap();
    assert_eq!(report.strategy(), SyncStrategy::Incremental);
    assert_eq!(watcher.status().row_count, 3);
}

#[test]
fn test_forced_syncs_are_serialized_with_the_poll_loop() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("knowledge.csv");
    write_table(&source, &entries(8));

    let engine = engine(&source, SqliteStore::open_in_memory().unwrap());
    let mut watcher = SourceWatcher::new(engine, Duration::from_millis(5));
    watcher.start().unwrap();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| watcher.force_sync().map(|r| r.strategy())))
            .collect();
        for handle in handles {
            let strategy = handle.join().unwrap().unwrap();
            assert!(matches!(strategy, SyncStrategy::Full | SyncStrategy::Skip));
        }
    });

    watcher.stop();
    let status = watcher.status();
    assert_eq!(status.row_count, 8);
    assert!(status.cycles >= 4);

    let persisted =
        knowledge_sync::sync::FingerprintCache::load(&cache_path(&source)).unwrap();
    assert_eq!(persisted.len(), 8);
}
