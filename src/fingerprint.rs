// ABOUTME: Content fingerprinting for knowledge rows
// ABOUTME: Derives a stable row identity and a content hash with SHA-256

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::source::KnowledgeRow;

/// Field separator fed to the hasher between identity fields, so that
/// ("ab", "c") and ("a", "bc") never hash alike.
const FIELD_SEPARATOR: &[u8] = &[0x1f];

/// Trailing marker that keeps exact identities apart from prefix identities
/// of rows whose content fits inside the prefix.
const EXACT_MARKER: &[u8] = b"exact";

/// Number of leading content characters that take part in the row identity.
///
/// Edits past this prefix keep the identity and surface as a changed
/// fingerprint; edits inside it surface as one new row plus one deleted row.
/// Distinct rows that share a prefix are told apart by [`exact_identity`].
pub const IDENTITY_PREFIX_CHARS: usize = 100;

/// Stable key of one logical knowledge entry: SHA-256 of the content prefix,
/// area and product type.
///
/// Two rows with identical content, area and product type are the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowIdentity(String);

/// SHA-256 of the content field alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowFingerprint(String);

impl RowIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RowFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RowIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<String> for RowFingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RowFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the identity and fingerprint of a row.
///
/// Deterministic and position independent: the result depends only on the
/// row's fields.
pub fn fingerprint_row(row: &KnowledgeRow) -> (RowIdentity, RowFingerprint) {
    (row_identity(row), content_fingerprint(&row.content))
}

pub fn row_identity(row: &KnowledgeRow) -> RowIdentity {
    let prefix_end = row
        .content
        .char_indices()
        .nth(IDENTITY_PREFIX_CHARS)
        .map(|(idx, _)| idx)
        .unwrap_or(row.content.len());

    let mut hasher = Sha256::new();
    hasher.update(row.content[..prefix_end].as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(row.area.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(row.product_type.as_bytes());
    RowIdentity(format!("{:x}", hasher.finalize()))
}

/// Identity over the full content, area and product type.
///
/// Used for rows whose prefix identity is already taken by a different row in
/// the same table.
pub fn exact_identity(row: &KnowledgeRow) -> RowIdentity {
    let mut hasher = Sha256::new();
    hasher.update(row.content.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(row.area.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(row.product_type.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(EXACT_MARKER);
    RowIdentity(format!("{:x}", hasher.finalize()))
}

pub fn content_fingerprint(content: &str) -> RowFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    RowFingerprint(format!("{:x}", hasher.finalize()))
}
