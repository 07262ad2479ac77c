// ABOUTME: ChangeAnalyzer - classifies source rows against the fingerprint cache
// ABOUTME: Single pass producing new/changed/unchanged/deleted row sets

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::cache::FingerprintCache;
use crate::fingerprint::{exact_identity, fingerprint_row, RowFingerprint, RowIdentity};
use crate::source::KnowledgeRow;
use crate::store::KnowledgeDocument;

/// A source row with its computed identity and fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedRow {
    pub id: RowIdentity,
    pub fingerprint: RowFingerprint,
    pub row: KnowledgeRow,
}

impl AnalyzedRow {
    pub fn to_document(&self) -> KnowledgeDocument {
        KnowledgeDocument {
            id: self.id.clone(),
            row: self.row.clone(),
        }
    }
}

/// Classification of the current source against the last synchronized state.
///
/// Computed fresh every cycle and never persisted. `new`, `changed` and
/// `unchanged` partition the current rows; `deleted` holds cached identities
/// absent from the source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    pub new: Vec<AnalyzedRow>,
    pub changed: Vec<AnalyzedRow>,
    pub unchanged: Vec<AnalyzedRow>,
    pub deleted: Vec<RowIdentity>,
    /// Distinct identities in the source after duplicate collapse
    pub total_rows: usize,
    /// Source rows that collapsed into an earlier row with the same identity
    pub duplicates: usize,
}

impl ChangeReport {
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.changed.is_empty() || !self.deleted.is_empty()
    }

    /// Share of current rows that need re-embedding.
    pub fn change_ratio(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        (self.new.len() + self.changed.len()) as f64 / self.total_rows as f64
    }

    /// Every current row, in source order within each class.
    pub fn current_rows(&self) -> impl Iterator<Item = &AnalyzedRow> {
        self.new
            .iter()
            .chain(self.changed.iter())
            .chain(self.unchanged.iter())
    }

    /// Rows an incremental sync must upsert.
    pub fn rows_to_upsert(&self) -> impl Iterator<Item = &AnalyzedRow> {
        self.new.iter().chain(self.changed.iter())
    }
}

impl fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows: {} new, {} changed, {} unchanged, {} deleted",
            self.total_rows,
            self.new.len(),
            self.changed.len(),
            self.unchanged.len(),
            self.deleted.len()
        )?;
        if self.duplicates > 0 {
            write!(f, " ({} duplicate rows collapsed)", self.duplicates)?;
        }
        Ok(())
    }
}

/// Classify `rows` against `cache` in one pass.
///
/// Rows with the same content, area and product type collapse to one entry
/// and the last one seen wins: its fields replace the earlier row's, at the
/// earlier row's position. Distinct rows that only share the identity prefix
/// are all kept; see [`resolve_shared_prefix`].
pub fn analyze_changes(rows: Vec<KnowledgeRow>, cache: &FingerprintCache) -> ChangeReport {
    let mut groups: Vec<(RowIdentity, Vec<AnalyzedRow>)> = Vec::new();
    let mut positions: HashMap<RowIdentity, usize> = HashMap::with_capacity(rows.len());
    let mut duplicates = 0usize;

    for row in rows {
        let (id, fingerprint) = fingerprint_row(&row);
        match positions.get(&id) {
            Some(&pos) => {
                let members = &mut groups[pos].1;
                match members.iter_mut().find(|m| m.fingerprint == fingerprint) {
                    Some(existing) => {
                        tracing::debug!("Duplicate row {} in source; last row wins", id);
                        duplicates += 1;
                        existing.row = row;
                    }
                    None => members.push(AnalyzedRow {
                        id,
                        fingerprint,
                        row,
                    }),
                }
            }
            None => {
                positions.insert(id.clone(), groups.len());
                groups.push((
                    id.clone(),
                    vec![AnalyzedRow {
                        id,
                        fingerprint,
                        row,
                    }],
                ));
            }
        }
    }

    let analyzed: Vec<AnalyzedRow> = groups
        .into_iter()
        .flat_map(|(shared, members)| resolve_shared_prefix(&shared, members, cache))
        .collect();

    let mut report = ChangeReport {
        total_rows: analyzed.len(),
        duplicates,
        ..Default::default()
    };

    let mut seen: HashSet<&RowIdentity> = HashSet::with_capacity(analyzed.len());
    for entry in &analyzed {
        seen.insert(&entry.id);
    }
    report.deleted = cache
        .identities()
        .filter(|id| !seen.contains(id))
        .cloned()
        .collect();

    for entry in analyzed {
        match cache.get(&entry.id) {
            None => report.new.push(entry),
            Some(cached) if *cached != entry.fingerprint => report.changed.push(entry),
            Some(_) => report.unchanged.push(entry),
        }
    }

    report
}

/// Give every distinct row sharing the prefix identity `shared` an identity
/// of its own.
///
/// One row keeps `shared`, the others switch to their exact identity. A row
/// already cached under its exact identity keeps it; otherwise the row whose
/// fingerprint is cached under `shared` keeps `shared`, falling back to the
/// first remaining row in source order. The assignment therefore survives
/// reordering, and an edit past the prefix still shows as a change.
fn resolve_shared_prefix(
    shared: &RowIdentity,
    mut members: Vec<AnalyzedRow>,
    cache: &FingerprintCache,
) -> Vec<AnalyzedRow> {
    if members.len() < 2 {
        return members;
    }

    tracing::warn!(
        "{} distinct rows share identity {}; indexing the extra rows by full content",
        members.len(),
        shared
    );

    let exact: Vec<RowIdentity> = members.iter().map(|m| exact_identity(&m.row)).collect();
    let eligible = |i: usize| !cache.contains(&exact[i]);
    let owner = (0..members.len())
        .find(|&i| eligible(i) && cache.get(shared) == Some(&members[i].fingerprint))
        .or_else(|| (0..members.len()).find(|&i| eligible(i)));

    for (i, (member, exact_id)) in members.iter_mut().zip(exact).enumerate() {
        if Some(i) != owner {
            member.id = exact_id;
        }
    }
    members
}

/// Cache contents that exactly describe `rows`.
pub fn cache_from_rows<'a>(rows: impl Iterator<Item = &'a AnalyzedRow>) -> FingerprintCache {
    let mut cache = FingerprintCache::new();
    for row in rows {
        cache.insert(row.id.clone(), row.fingerprint.clone());
    }
    cache
}
