use std::path::Path;

use ibtikar_index::{Chunk, ChunkStore, FlatL2Index, SourceRecord, VectorIndex};
use tracing::{debug, info};

use crate::chunk::TextChunker;
use crate::embedding::{embed_in_batches, Embedder};
use crate::error::{RagError, Result};

const UNKNOWN_SOURCE: &str = "unknown";

/// Row-aligned chunk store and vector index produced by one ingestion run.
pub struct Corpus {
    pub store: ChunkStore,
    pub index: FlatL2Index,
}

impl Corpus {
    pub fn write(&self, index_path: &Path, docs_path: &Path) -> Result<()> {
        self.index.write(index_path)?;
        self.store.write(docs_path)?;
        info!(
            chunks = self.store.len(),
            index = %index_path.display(),
            docs = %docs_path.display(),
            "corpus written"
        );
        Ok(())
    }
}

/// Chunks, embeds and indexes ingestion records.
pub fn build_corpus(
    records: &[SourceRecord],
    embedder: &dyn Embedder,
    chunker: &TextChunker,
    batch_size: usize,
) -> Result<Corpus> {
    if records.is_empty() {
        return Err(RagError::EmptyCorpus("no records to index"));
    }
    let chunks = chunk_records(records, chunker);
    if chunks.is_empty() {
        return Err(RagError::EmptyCorpus("no chunks produced from records"));
    }
    debug!(records = records.len(), chunks = chunks.len(), "chunked records");

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_in_batches(embedder, &texts, batch_size).map_err(RagError::embedding)?;
    let dimensions = vectors
        .first()
        .map(Vec::len)
        .or_else(|| embedder.dimensions())
        .unwrap_or(0);
    if dimensions == 0 {
        return Err(RagError::Embedding(
            "embedder returned zero-length vectors".into(),
        ));
    }
    let mut index = FlatL2Index::new(dimensions);
    for vector in &vectors {
        if vector.len() != dimensions {
            return Err(RagError::DimensionMismatch {
                expected: dimensions,
                actual: vector.len(),
            });
        }
        index.add(vector).map_err(RagError::index)?;
    }
    if index.len() != chunks.len() {
        return Err(RagError::Misaligned {
            chunks: chunks.len(),
            rows: index.len(),
        });
    }
    Ok(Corpus {
        store: ChunkStore::new(chunks),
        index,
    })
}

fn chunk_records(records: &[SourceRecord], chunker: &TextChunker) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for record in records {
        let source = record
            .source
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SOURCE);
        let text = record.text.as_deref().unwrap_or("");
        for window in chunker.split(text) {
            if window.trim().is_empty() {
                continue;
            }
            chunks.push(Chunk::new(source, window));
        }
    }
    chunks
}
