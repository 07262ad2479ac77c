// ABOUTME: Knowledge store collaborator interface
// ABOUTME: Bulk load, delete, smoke-test search, and statistics over indexed rows

pub mod sqlite;

pub use sqlite::SqliteStore;

use anyhow::Result;

use crate::fingerprint::RowIdentity;
use crate::source::KnowledgeRow;

/// A row paired with the identity it is indexed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeDocument {
    pub id: RowIdentity,
    pub row: KnowledgeRow,
}

/// How a bulk load treats existing store contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    /// Drop everything before loading. Destructive.
    pub recreate: bool,
    /// Replace documents whose identity already exists instead of failing.
    pub upsert: bool,
}

impl LoadOptions {
    pub fn recreate() -> Self {
        Self {
            recreate: true,
            upsert: false,
        }
    }

    pub fn upsert() -> Self {
        Self {
            recreate: false,
            upsert: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStatistics {
    pub row_count: u64,
}

/// The indexed knowledge store the engine keeps in sync.
///
/// Calls are blocking from the engine's point of view. Implementations must
/// make `load` idempotent under `upsert` and destructive under `recreate`, and
/// must not leave a partially applied `load` visible when they return an error.
pub trait KnowledgeStore: Send {
    /// Bulk ingest. Returns the number of documents written.
    fn load(&mut self, documents: &[KnowledgeDocument], options: LoadOptions) -> Result<u64>;

    /// Remove documents by identity. Unknown identities are ignored.
    fn delete(&mut self, ids: &[RowIdentity]) -> Result<u64>;

    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    fn get_statistics(&self) -> Result<StoreStatistics>;
}

impl<S: KnowledgeStore + ?Sized> KnowledgeStore for Box<S> {
    fn load(&mut self, documents: &[KnowledgeDocument], options: LoadOptions) -> Result<u64> {
        (**self).load(documents, options)
    }

    fn delete(&mut self, ids: &[RowIdentity]) -> Result<u64> {
        (**self).delete(ids)
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        (**self).search(query, limit)
    }

    fn get_statistics(&self) -> Result<StoreStatistics> {
        (**self).get_statistics()
    }
}
