use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::Chunk;

/// Ordered, read-only chunk sequence. Position `i` joins to index row `i`.
#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
}

impl ChunkStore {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open chunk store {}", path.display()))?;
        let chunks: Vec<Chunk> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid chunk store {}", path.display()))?;
        Ok(Self { chunks })
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(
            File::create(path)
                .with_context(|| format!("failed to create chunk store {}", path.display()))?,
        );
        serde_json::to_writer(&mut writer, &self.chunks)?;
        writer.flush()?;
        Ok(())
    }

    /// Resolves an index position; negative or out-of-range positions yield `None`.
    pub fn get(&self, position: i64) -> Option<&Chunk> {
        usize::try_from(position)
            .ok()
            .and_then(|idx| self.chunks.get(idx))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_rejects_out_of_range_positions() {
        let store = ChunkStore::new(vec![Chunk::new("gdoc:1", "a"), Chunk::new("gdoc:2", "b")]);
        assert_eq!(store.get(1).map(|c| c.text.as_str()), Some("b"));
        assert!(store.get(2).is_none());
        assert!(store.get(-1).is_none());
    }

    #[test]
    fn persists_as_json_array_with_unicode_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/docs.json");
        let store = ChunkStore::new(vec![Chunk::new(
            "https://ibtikar.org.tr/about",
            "ابتكار مبادرة تطوعية",
        )]);
        store.write(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with('['));
        assert!(raw.contains("ابتكار"));

        let loaded = ChunkStore::load(&path).unwrap();
        assert_eq!(loaded.chunks(), store.chunks());
    }

    #[test]
    fn load_fails_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ChunkStore::load(dir.path().join("missing.json")).is_err());
    }
}
