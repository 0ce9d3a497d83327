pub mod allowlist;
pub mod config;
pub mod embedding;
pub mod lazy;
pub mod prompt;
pub mod rerank;
pub mod retriever;

pub use allowlist::{SourceAllowlist, DEFAULT_ALLOW_DOMAINS, DEFAULT_SENTINEL};
pub use config::{EmbeddingConfig, EmbeddingProvider, RerankConfig, RetrievalConfig};
pub use embedding::{EmbeddingClient, OpenAiEmbeddingClient};
pub use lazy::LazyRetriever;
pub use prompt::{
    build_context, detect_language, no_context_reply, unique_sources, GroundedPrompt, Lang,
    PromptOptions,
};
pub use rerank::{load_reranker, HttpReranker, Reranker};
pub use retriever::{
    dedup_by_text, merge_positions, Retrieval, RetrievalTrace, Retriever, RetrieverBuilder,
};
pub use ibtikar_core::{RagError, Result};
pub use ibtikar_index::Chunk;
