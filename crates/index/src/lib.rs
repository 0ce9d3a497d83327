//! Persisted corpus layer: chunk records, the chunk store and the flat
//! vector index that is row-aligned with it.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

mod flat;
mod store;

pub use flat::{FlatL2Index, INDEX_MAGIC, INDEX_VERSION};
pub use store::ChunkStore;

/// A bounded window of source text with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source: String,
    pub text: String,
}

impl Chunk {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }
}

/// Un-chunked record handed over by ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceRecord {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// One k-NN hit. Positions are signed because some index formats pad short
/// result lists with `-1`; callers discard anything outside the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: i64,
    pub distance: f32,
}

pub trait VectorIndex: Send + Sync {
    /// Nearest rows to `query`, distance ascending, at most `k` entries.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    fn len(&self) -> usize;

    fn dimensions(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads ingestion records from either a JSON array or JSON lines.
pub fn read_source_records(path: &Path) -> Result<Vec<SourceRecord>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read records from {}", path.display()))?;
    parse_source_records(&raw).with_context(|| format!("invalid records in {}", path.display()))
}

pub fn parse_source_records(raw: &str) -> Result<Vec<SourceRecord>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    let mut records = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: SourceRecord = serde_json::from_str(line)
            .with_context(|| format!("line {}", line_no + 1))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array_records() {
        let raw = r#"[{"source": "gdoc:abc", "text": "hello"}, {"text": "orphan"}]"#;
        let records = parse_source_records(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source.as_deref(), Some("gdoc:abc"));
        assert!(records[1].source.is_none());
    }

    #[test]
    fn parses_jsonl_records_and_skips_blank_lines() {
        let raw = "{\"source\":\"https://ibtikar.org.tr/a\",\"text\":\"one\"}\n\n{\"source\":\"x\",\"text\":\"two\"}\n";
        let records = parse_source_records(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].text.as_deref(), Some("two"));
    }

    #[test]
    fn reports_bad_jsonl_line() {
        let err = parse_source_records("{\"text\":\"ok\"}\nnot json\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }
}
