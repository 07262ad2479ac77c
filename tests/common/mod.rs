// ABOUTME: Shared helpers for knowledge-sync integration tests
// ABOUTME: Table writers, engine builders, and a store wrapper with injectable failures
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use knowledge_sync::fingerprint::{row_identity, RowIdentity};
use knowledge_sync::source::{KnowledgeRow, SourceTable};
use knowledge_sync::store::{
    KnowledgeDocument, KnowledgeStore, LoadOptions, SearchHit, SqliteStore, StoreStatistics,
};
use knowledge_sync::sync::{FingerprintCache, SmokeTest, SyncEngine, SyncPolicy};

/// A row whose content starts with a long, index-specific preamble so edits
/// appended to it keep the row identity.
pub fn entry(index: usize, revision: &str) -> KnowledgeRow {
    let mut row = KnowledgeRow::new(
        &format!(
            "Entry {index}: customers asking about topic {index} should be guided through the \
             standard troubleshooting checklist before escalation. Revision {revision}."
        ),
        "support",
        "saas",
    );
    row.complexity = "low".into();
    row.audience = "agent".into();
    row.keywords = vec![format!("topic{index}"), "help".into()];
    row
}

pub fn entries(count: usize) -> Vec<KnowledgeRow> {
    (0..count).map(|i| entry(i, "1")).collect()
}

pub fn write_table(path: &Path, rows: &[KnowledgeRow]) {
    let mut writer = csv::Writer::from_path(path).unwrap();
    writer
        .write_record([
            "Content",
            "Area",
            "Product Type",
            "Complexity",
            "Audience",
            "Keywords",
        ])
        .unwrap();
    for row in rows {
        writer
            .write_record([
                row.content.as_str(),
                row.area.as_str(),
                row.product_type.as_str(),
                row.complexity.as_str(),
                row.audience.as_str(),
                row.keywords.join(", ").as_str(),
            ])
            .unwrap();
    }
    writer.flush().unwrap();
}

/// Move the file's modification time forward so pollers always notice.
pub fn bump_mtime(path: &Path, seconds: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(seconds))
        .unwrap();
}

pub fn id_of(row: &KnowledgeRow) -> RowIdentity {
    row_identity(row)
}

pub fn engine<S: KnowledgeStore>(source: &Path, store: S) -> SyncEngine<S> {
    SyncEngine::new(
        SourceTable::new(source),
        store,
        cache_path(source),
        SyncPolicy::default(),
        SmokeTest::default(),
    )
}

pub fn cache_path(source: &Path) -> PathBuf {
    FingerprintCache::default_path(source)
}

/// Poll `check` until it holds or five seconds pass.
pub fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}

/// Switches shared between a test and a [`FlakyStore`] owned by an engine.
#[derive(Clone, Default)]
pub struct StoreControls {
    pub fail_upsert: Arc<AtomicBool>,
    pub fail_recreate: Arc<AtomicBool>,
    pub deleted: Arc<Mutex<Vec<RowIdentity>>>,
    pub upserted: Arc<Mutex<Vec<RowIdentity>>>,
}

impl StoreControls {
    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upsert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rebuilds(&self, fail: bool) {
        self.fail_recreate.store(fail, Ordering::SeqCst);
    }

    pub fn take_deleted(&self) -> Vec<RowIdentity> {
        std::mem::take(&mut *self.deleted.lock().unwrap())
    }

    pub fn take_upserted(&self) -> Vec<RowIdentity> {
        std::mem::take(&mut *self.upserted.lock().unwrap())
    }
}

/// SQLite store that records writes and rejects them on request.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub controls: StoreControls,
}

impl FlakyStore {
    pub fn new() -> (Self, StoreControls) {
        let controls = StoreControls::default();
        let store = Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            controls: controls.clone(),
        };
        (store, controls)
    }
}

impl KnowledgeStore for FlakyStore {
    fn load(&mut self, documents: &[KnowledgeDocument], options: LoadOptions) -> anyhow::Result<u64> {
        if options.recreate && self.controls.fail_recreate.load(Ordering::SeqCst) {
            anyhow::bail!("store rejected rebuild");
        }
        if !options.recreate && self.controls.fail_upsert.load(Ordering::SeqCst) {
            anyhow::bail!("store rejected upsert");
        }
        if !options.recreate {
            self.controls
                .upserted
                .lock()
                .unwrap()
                .extend(documents.iter().map(|d| d.id.clone()));
        }
        self.inner.load(documents, options)
    }

    fn delete(&mut self, ids: &[RowIdentity]) -> anyhow::Result<u64> {
        self.controls.deleted.lock().unwrap().extend_from_slice(ids);
        self.inner.delete(ids)
    }

    fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchHit>> {
        self.inner.search(query, limit)
    }

    fn get_statistics(&self) -> anyhow::Result<StoreStatistics> {
        self.inner.get_statistics()
    }
}
