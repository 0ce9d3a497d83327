mod chunk;
mod embedding;
mod error;
mod ingest;
mod normalization;

pub use chunk::{ChunkConfig, TextChunker};
pub use embedding::{embed_in_batches, Embedder, HashEmbedder, HashEmbedderConfig};
pub use error::{RagError, Result};
pub use ingest::{build_corpus, Corpus};
pub use normalization::{
    contains_arabic, dedup_key, expand_query, is_arabic_char, normalize_arabic,
};
