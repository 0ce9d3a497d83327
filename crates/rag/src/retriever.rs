//! Retrieval orchestration: multi-query recall, merge, allowlist filtering
//! with fallback, optional reranking, text dedup and truncation.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use ibtikar_core::{dedup_key, expand_query, Embedder, RagError, Result};
use ibtikar_index::{Chunk, ChunkStore, FlatL2Index, Neighbor, VectorIndex};

use crate::allowlist::SourceAllowlist;
use crate::config::{RetrievalConfig, DEFAULT_RECALL_K};
use crate::embedding::EmbeddingClient;
use crate::rerank::{load_reranker, Reranker};

/// Minimum number of unfiltered candidates kept when the allowlist would
/// otherwise leave nothing.
pub const FALLBACK_FLOOR: usize = 10;

/// Per-call counters, logged at debug level and surfaced by the CLI and
/// service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalTrace {
    pub variants: usize,
    pub recalled: usize,
    pub merged: usize,
    pub out_of_range: usize,
    pub allowed: usize,
    pub fallback: bool,
    pub reranked: bool,
    pub returned: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Retrieval {
    pub chunks: Vec<Chunk>,
    pub trace: RetrievalTrace,
}

/// Shared, read-only retrieval service. Build once, call from any thread.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<ChunkStore>,
    reranker: Option<Arc<dyn Reranker>>,
    allowlist: SourceAllowlist,
    recall_width: usize,
}

pub struct RetrieverBuilder {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<ChunkStore>,
    reranker: Option<Arc<dyn Reranker>>,
    allowlist: SourceAllowlist,
    recall_width: usize,
}

impl RetrieverBuilder {
    pub fn reranker(mut self, reranker: Option<Arc<dyn Reranker>>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn allowlist(mut self, allowlist: SourceAllowlist) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn recall_width(mut self, recall_width: usize) -> Self {
        self.recall_width = recall_width;
        self
    }

    pub fn build(self) -> Result<Retriever> {
        if self.store.len() != self.index.len() {
            return Err(RagError::Misaligned {
                chunks: self.store.len(),
                rows: self.index.len(),
            });
        }
        if self.recall_width == 0 {
            return Err(RagError::InvalidConfig("recall width must be > 0".into()));
        }
        if let Some(dims) = self.embedder.dimensions() {
            if !self.index.is_empty() && dims != self.index.dimensions() {
                return Err(RagError::DimensionMismatch {
                    expected: self.index.dimensions(),
                    actual: dims,
                });
            }
        }
        Ok(Retriever {
            embedder: self.embedder,
            index: self.index,
            store: self.store,
            reranker: self.reranker,
            allowlist: self.allowlist,
            recall_width: self.recall_width,
        })
    }
}

impl Retriever {
    pub fn builder(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<ChunkStore>,
    ) -> RetrieverBuilder {
        RetrieverBuilder {
            embedder,
            index,
            store,
            reranker: None,
            allowlist: SourceAllowlist::default(),
            recall_width: DEFAULT_RECALL_K,
        }
    }

    /// Loads store, index, embedder and reranker described by `config`.
    /// Anything but the reranker failing to load is fatal.
    pub fn open(config: &RetrievalConfig) -> Result<Self> {
        let store = ChunkStore::load(&config.docs_path)?;
        let index = FlatL2Index::load(&config.index_path).map_err(RagError::index)?;
        let embedder = EmbeddingClient::from_config(&config.embedding).map_err(RagError::embedding)?;
        info!(
            chunks = store.len(),
            dimensions = index.dimensions(),
            provider = config.embedding.provider.as_str(),
            "retrieval corpus loaded"
        );
        Self::builder(Arc::new(embedder), Arc::new(index), Arc::new(store))
            .reranker(load_reranker(&config.rerank))
            .allowlist(config.allowlist())
            .recall_width(config.recall_k)
            .build()
    }

    /// Ranked chunks for `query`, at most `top_k` of them.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Chunk>> {
        self.retrieve_with_trace(query, top_k).map(|r| r.chunks)
    }

    pub fn retrieve_with_trace(&self, query: &str, top_k: usize) -> Result<Retrieval> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument("top_k must be > 0".into()));
        }
        let mut trace = RetrievalTrace::default();

        let variants = expand_query(query);
        trace.variants = variants.len();
        let hit_lists = self.recall(&variants)?;
        trace.recalled = hit_lists.iter().map(Vec::len).sum();

        let (positions, out_of_range) = merge_positions(&hit_lists, self.store.len());
        trace.out_of_range = out_of_range;
        if out_of_range > 0 {
            warn!(
                out_of_range,
                store_len = self.store.len(),
                "vector index returned positions outside the chunk store"
            );
        }
        let merged: Vec<&Chunk> = positions
            .into_iter()
            .filter_map(|position| self.store.get(position as i64))
            .collect();
        trace.merged = merged.len();

        let (candidates, fallback) = self.filter_allowed(merged, top_k);
        trace.fallback = fallback;
        trace.allowed = if fallback { 0 } else { candidates.len() };

        let (candidates, reranked) = self.rerank(query, candidates, top_k);
        trace.reranked = reranked;

        let mut candidates = dedup_texts(candidates, |c| c.text.as_str());
        candidates.truncate(top_k);
        let chunks: Vec<Chunk> = candidates.into_iter().cloned().collect();
        trace.returned = chunks.len();
        debug!(?trace, "retrieval finished");
        Ok(Retrieval { chunks, trace })
    }

    fn recall(&self, variants: &[String]) -> Result<Vec<Vec<Neighbor>>> {
        let vectors = self.embedder.embed(variants).map_err(RagError::embedding)?;
        if vectors.len() != variants.len() {
            return Err(RagError::Embedding(format!(
                "embedder returned {} vectors for {} queries",
                vectors.len(),
                variants.len()
            )));
        }
        if self.index.is_empty() {
            return Ok(vec![Vec::new(); variants.len()]);
        }
        let mut hit_lists = Vec::with_capacity(vectors.len());
        for vector in &vectors {
            if vector.len() != self.index.dimensions() {
                return Err(RagError::DimensionMismatch {
                    expected: self.index.dimensions(),
                    actual: vector.len(),
                });
            }
            let hits = self
                .index
                .search(vector, self.recall_width)
                .map_err(RagError::index)?;
            hit_lists.push(hits);
        }
        Ok(hit_lists)
    }

    fn filter_allowed<'a>(
        &self,
        merged: Vec<&'a Chunk>,
        top_k: usize,
    ) -> (Vec<&'a Chunk>, bool) {
        let allowed: Vec<&'a Chunk> = merged
            .iter()
            .copied()
            .filter(|c| self.allowlist.allows(&c.source))
            .collect();
        if !allowed.is_empty() || merged.is_empty() {
            return (allowed, false);
        }
        let keep = top_k.max(FALLBACK_FLOOR);
        warn!(
            merged = merged.len(),
            keep, "no candidate passed the source allowlist; using unfiltered results"
        );
        let mut fallback = merged;
        fallback.truncate(keep);
        (fallback, true)
    }

    fn rerank<'a>(
        &self,
        query: &str,
        candidates: Vec<&'a Chunk>,
        top_k: usize,
    ) -> (Vec<&'a Chunk>, bool) {
        let Some(reranker) = &self.reranker else {
            return (candidates, false);
        };
        if candidates.len() <= top_k {
            return (candidates, false);
        }
        let passages: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let scores = match reranker.score(query, &passages) {
            Ok(scores) if scores.len() == candidates.len() => scores,
            Ok(scores) => {
                warn!(
                    expected = candidates.len(),
                    got = scores.len(),
                    "reranker returned wrong number of scores; keeping recall order"
                );
                return (candidates, false);
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "reranking failed; keeping recall order");
                return (candidates, false);
            }
        };
        (sort_by_score(candidates, &scores), true)
    }
}

/// Concatenates per-variant hit lists in issue order and keeps the first
/// occurrence of each in-range position. Returns the positions and how many
/// hits pointed outside `[0, store_len)`.
pub fn merge_positions(hit_lists: &[Vec<Neighbor>], store_len: usize) -> (Vec<usize>, usize) {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    let mut out_of_range = 0usize;
    for hit in hit_lists.iter().flatten() {
        let position = match usize::try_from(hit.position) {
            Ok(p) if p < store_len => p,
            _ => {
                out_of_range += 1;
                continue;
            }
        };
        if seen.insert(position) {
            merged.push(position);
        }
    }
    (merged, out_of_range)
}

/// Stable sort by descending score; NaN scores sink to the end.
fn sort_by_score<T>(items: Vec<T>, scores: &[f32]) -> Vec<T> {
    let mut scored: Vec<(f32, T)> = scores
        .iter()
        .map(|s| if s.is_nan() { f32::NEG_INFINITY } else { *s })
        .zip(items)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, item)| item).collect()
}

fn dedup_texts<T, F>(items: Vec<T>, text: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            let key = dedup_key(text(item));
            !key.is_empty() && seen.insert(key)
        })
        .collect()
}

/// Drops chunks whose trimmed, case-folded text repeats an earlier one (or is
/// empty), keeping first occurrences in order.
pub fn dedup_by_text(chunks: Vec<Chunk>) -> Vec<Chunk> {
    dedup_texts(chunks, |c| c.text.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(position: i64, distance: f32) -> Neighbor {
        Neighbor { position, distance }
    }

    #[test]
    fn merge_prefers_first_variant_and_drops_out_of_range() {
        let lists = vec![
            vec![hit(2, 0.1), hit(0, 0.2), hit(9, 0.3)],
            vec![hit(1, 0.05), hit(2, 0.06), hit(-1, f32::MAX)],
        ];
        let (merged, dropped) = merge_positions(&lists, 3);
        assert_eq!(merged, vec![2, 0, 1]);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn dedup_keeps_first_and_drops_blank() {
        let chunks = vec![
            Chunk::new("a", "Ibtikar was founded in 2022."),
            Chunk::new("b", "  ibtikar WAS founded in 2022.  "),
            Chunk::new("c", "   "),
            Chunk::new("d", "Other"),
        ];
        let deduped = dedup_by_text(chunks);
        let sources: Vec<&str> = deduped.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(sources, vec!["a", "d"]);
    }

    #[test]
    fn score_sort_is_stable_and_descending() {
        let items = vec!["a", "b", "c", "d"];
        let sorted = sort_by_score(items, &[0.5, 0.9, 0.5, f32::NAN]);
        assert_eq!(sorted, vec!["b", "a", "c", "d"]);
    }
}
