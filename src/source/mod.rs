// ABOUTME: Knowledge table source - row model and table readers
// ABOUTME: Reads the externally edited table (CSV or JSON) and its modification time

pub mod reader;

pub use reader::{read_modified_time, SourceFormat, SourceTable};

use serde::{Deserialize, Serialize};

/// One authored entry of the knowledge table.
///
/// Rows are immutable input for a single synchronization pass. Only `content`,
/// `area` and `product_type` participate in the row identity; the remaining
/// tags travel with the row into the store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KnowledgeRow {
    pub content: String,
    pub area: String,
    pub product_type: String,
    pub complexity: String,
    pub audience: String,
    pub keywords: Vec<String>,
}

impl KnowledgeRow {
    /// Create a row with content and the two identity tags, other tags empty.
    pub fn new(content: &str, area: &str, product_type: &str) -> Self {
        Self {
            content: content.to_string(),
            area: area.to_string(),
            product_type: product_type.to_string(),
            ..Default::default()
        }
    }
}

/// Split a keyword cell on `,` or `;`, dropping empty entries.
pub(crate) fn split_keywords(cell: &str) -> Vec<String> {
    cell.split([',', ';'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
