// ABOUTME: Integration tests for fingerprint cache recovery
// ABOUTME: Corrupt, truncated, and missing cache files are rebuilt by the next cycle

mod common;

use common::*;
use knowledge_sync::store::{KnowledgeStore, SqliteStore};
use knowledge_sync::sync::{FingerprintCache, SyncStrategy};
use tempfile::tempdir;

#[test]
fn test_corrupted_cache_is_rebuilt() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("knowledge.csv");
    let store_path = dir.path().join("knowledge.sqlite");
    write_table(&source, &entries(10));

    {
        let mut engine = engine(&source, SqliteStore::open(&store_path).unwrap());
        engine.run_cycle().unwrap();
    }

    std::fs::write(cache_path(&source), "{\"version\": 1, \"entries\": {\"abc\": tru").unwrap();

    let mut engine = engine(&source, SqliteStore::open(&store_path).unwrap());
    assert!(engine.cache().is_empty());

    let report = engine.run_cycle().unwrap();
    assert!(report.cache_reset);
    assert_eq!(report.strategy(), SyncStrategy::Full);
    assert_eq!(report.cache_entries, 10);

    let rebuilt = FingerprintCache::load(&cache_path(&source)).unwrap();
    assert_eq!(rebuilt.len(), 10);
    assert!(rebuilt.synced_at.is_some());
    assert_eq!(engine.store().get_statistics().unwrap().row_count, 10);

    // The repaired cache is a normal baseline again.
    let next = engine.run_cycle().unwrap();
    assert!(!next.cache_reset);
    assert_eq!(next.strategy(), SyncStrategy::Skip);
}

#[test]
fn test_truncated_cache_file_is_rebuilt() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("knowledge.csv");
    write_table(&source, &entries(3));
    std::fs::write(cache_path(&source), b"").unwrap();

    let mut engine = engine(&source, SqliteStore::open_in_memory().unwrap());
    let report = engine.run_cycle().unwrap();
    assert!(report.cache_reset);
    assert_eq!(FingerprintCache::load(&cache_path(&source)).unwrap().len(), 3);
}

#[test]
fn test_corrupt_cache_with_empty_table_is_rewritten() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("knowledge.csv");
    write_table(&source, &[]);
    std::fs::write(cache_path(&source), "not json at all").unwrap();

    let mut engine = engine(&source, SqliteStore::open_in_memory().unwrap());
    let report = engine.run_cycle().unwrap();
    assert_eq!(report.strategy(), SyncStrategy::Skip);
    assert!(report.cache_reset);

    let repaired = FingerprintCache::load(&cache_path(&source)).unwrap();
    assert!(repaired.is_empty());
}

#[test]
fn test_deleted_cache_file_triggers_one_rebuild() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("knowledge.csv");
    let store_path = dir.path().join("knowledge.sqlite");
    write_table(&source, &entries(5));

    {
        let mut engine = engine(&source, SqliteStore::open(&store_path).unwrap());
        engine.run_cycle().unwrap();
    }
    std::fs::remove_file(cache_path(&source)).unwrap();

    let mut engine = engine(&source, SqliteStore::open(&store_path).unwrap());
    let report = engine.run_cycle().unwrap();
    assert!(!report.cache_reset);
    assert_eq!(report.strategy(), SyncStrategy::Full);
    assert_eq!(engine.store().get_statistics().unwrap().row_count, 5);
    assert_eq!(engine.run_cycle().unwrap().strategy(), SyncStrategy::Skip);
}
