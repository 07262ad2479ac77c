// ABOUTME: SQLite-backed knowledge store for local deployments and tests
// ABOUTME: Transactional bulk load; keyword-overlap search used by the smoke test

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;

use super::{KnowledgeDocument, KnowledgeStore, LoadOptions, SearchHit, StoreStatistics};
use crate::fingerprint::RowIdentity;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id            TEXT PRIMARY KEY,
    content       TEXT NOT NULL,
    area          TEXT NOT NULL,
    product_type  TEXT NOT NULL,
    complexity    TEXT NOT NULL,
    audience      TEXT NOT NULL,
    keywords      TEXT NOT NULL,
    indexed_at    TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create store directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open knowledge store {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "wal")
            .context("failed to enable WAL for knowledge store")?;
        Self::with_connection(conn)
    }

    /// Open an existing store without creating or migrating anything.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open knowledge store {}", path.display()))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to initialize knowledge store schema")?;
        Ok(Self { conn })
    }

    /// Identities currently indexed, sorted.
    pub fn ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM documents ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Content stored under an identity, if any.
    pub fn content_of(&self, id: &RowIdentity) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT content FROM documents WHERE id = ?1")?;
        let mut rows = stmt.query([id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

impl KnowledgeStore for SqliteStore {
    fn load(&mut self, documents: &[KnowledgeDocument], options: LoadOptions) -> Result<u64> {
        let tx = self
            .conn
            .transaction()
            .context("failed to begin load transaction")?;

        if options.recreate {
            tx.execute("DELETE FROM documents", [])
                .context("failed to clear knowledge store")?;
        }

        let sql = if options.upsert {
            "INSERT OR REPLACE INTO documents
                (id, content, area, product_type, complexity, audience, keywords)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        } else {
            "INSERT INTO documents
                (id, content, area, product_type, complexity, audience, keywords)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        };

        let mut written = 0u64;
        {
            let mut stmt = tx.prepare(sql)?;
            for doc in documents {
                let keywords = serde_json::to_string(&doc.row.keywords)?;
                stmt.execute(params![
                    doc.id.as_str(),
                    doc.row.content,
                    doc.row.area,
                    doc.row.product_type,
                    doc.row.complexity,
                    doc.row.audience,
                    keywords,
                ])
                .with_context(|| format!("failed to write document {}", doc.id))?;
                written += 1;
            }
        }

        // Dropping `tx` on an early return above rolls the whole load back.
        tx.commit().context("failed to commit load transaction")?;
        tracing::debug!(
            "Loaded {} documents (recreate={}, upsert={})",
            written,
            options.recreate,
            options.upsert
        );
        Ok(written)
    }

    fn delete(&mut self, ids: &[RowIdentity]) -> Result<u64> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0u64;
        {
            let mut stmt = tx.prepare("DELETE FROM documents WHERE id = ?1")?;
            for id in ids {
                deleted += stmt.execute([id.as_str()])? as u64;
            }
        }
        tx.commit().context("failed to commit delete transaction")?;
        Ok(deleted)
    }

    /// Rank documents by how many query terms appear in their content or
    /// keywords. Like a nearest-neighbour query, the best `limit` documents
    /// are returned even when none overlap, so an empty result means an empty
    /// store.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if limit == 0 {
            bail!("search limit must be at least 1");
        }

        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        let mut stmt = self
            .conn
            .prepare("SELECT id, content, keywords FROM documents ORDER BY id")?;
        let mut hits = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .map(|r| {
                r.map(|(id, content, keywords)| {
                    let haystack = format!("{} {}", content, keywords).to_lowercase();
                    let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                    let score = if terms.is_empty() {
                        0.0
                    } else {
                        matched as f32 / terms.len() as f32
                    };
                    SearchHit { id, content, score }
                })
            })
            .collect::<Result<Vec<SearchHit>, _>>()?;

        // Stable sort keeps id order among equal scores.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    fn get_statistics(&self) -> Result<StoreStatistics> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .context("failed to count documents")?;
        Ok(StoreStatistics {
            row_count: count as u64,
        })
    }
}
