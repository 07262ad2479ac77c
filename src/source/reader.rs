// ABOUTME: Source table reading - CSV and JSON knowledge tables
// ABOUTME: Normalizes headers, skips blank rows, and reports modification time

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{split_keywords, KnowledgeRow};
use crate::error::SyncError;

/// On-disk format of the knowledge table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Json,
}

impl SourceFormat {
    /// Pick a format from the file extension. Anything but `.json` is CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SourceFormat::Json,
            _ => SourceFormat::Csv,
        }
    }
}

/// Handle to the externally edited knowledge table.
#[derive(Debug, Clone)]
pub struct SourceTable {
    path: PathBuf,
    format: SourceFormat,
}

impl SourceTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = SourceFormat::from_path(&path);
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Modification timestamp of the table file.
    pub fn modified(&self) -> Result<SystemTime, SyncError> {
        read_modified_time(&self.path)
    }

    /// Read every non-blank row of the table.
    ///
    /// The table is re-read in full on every call; nothing is cached between
    /// passes.
    pub fn read_rows(&self) -> Result<Vec<KnowledgeRow>, SyncError> {
        if !self.exists() {
            return Err(SyncError::SourceMissing(self.path.clone()));
        }

        let parsed = match self.format {
            SourceFormat::Csv => std::fs::File::open(&self.path)
                .with_context(|| format!("Failed to open {}", self.path.display()))
                .and_then(parse_csv),
            SourceFormat::Json => std::fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read {}", self.path.display()))
                .and_then(|text| parse_json(&text)),
        };

        let rows = parsed.map_err(|cause| SyncError::SourceUnreadable {
            path: self.path.clone(),
            cause,
        })?;

        tracing::debug!(
            "Read {} rows from {} ({:?})",
            rows.len(),
            self.path.display(),
            self.format
        );
        Ok(rows)
    }
}

/// Read a file's modification time, mapping absence to [`SyncError::SourceMissing`].
pub fn read_modified_time(path: &Path) -> Result<SystemTime, SyncError> {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => Ok(modified),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(SyncError::SourceMissing(path.to_path_buf()))
        }
        Err(e) => Err(SyncError::SourceUnreadable {
            path: path.to_path_buf(),
            cause: anyhow::Error::new(e).context("Failed to read modification time"),
        }),
    }
}

/// Lowercase a header and fold spaces and hyphens to underscores.
///
/// "Product Type", "product-type" and "PRODUCT_TYPE" all become "product_type".
fn normalize_header(header: &str) -> String {
    header
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

fn row_from_cells(cells: &HashMap<String, String>) -> Option<KnowledgeRow> {
    let cell = |name: &str| cells.get(name).map(|v| v.trim().to_string()).unwrap_or_default();

    let content = cell("content");
    if content.is_empty() {
        return None;
    }

    Some(KnowledgeRow {
        content,
        area: cell("area"),
        product_type: cell("product_type"),
        complexity: cell("complexity"),
        audience: cell("audience"),
        keywords: split_keywords(&cell("keywords")),
    })
}

fn parse_csv<R: Read>(input: R) -> Result<Vec<KnowledgeRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header row")?
        .iter()
        .map(normalize_header)
        .collect();

    if !headers.iter().any(|h| h == "content") {
        bail!("CSV header has no 'content' column (found: {})", headers.join(", "));
    }

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to parse CSV record {}", line + 1))?;
        let cells: HashMap<String, String> = headers
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect();
        match row_from_cells(&cells) {
            Some(row) => rows.push(row),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} CSV rows with blank content", skipped);
    }
    Ok(rows)
}

fn json_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(json_cell).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn parse_json(text: &str) -> Result<Vec<KnowledgeRow>> {
    let objects: Vec<serde_json::Map<String, Value>> =
        serde_json::from_str(text).context("Expected a JSON array of row objects")?;

    let mut rows = Vec::with_capacity(objects.len());
    for object in &objects {
        let cells: HashMap<String, String> = object
            .iter()
            .map(|(key, value)| (normalize_header(key), json_cell(value)))
            .collect();
        if let Some(row) = row_from_cells(&cells) {
            rows.push(row);
        }
    }
    Ok(rows)
}
