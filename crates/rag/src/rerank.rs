use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RerankConfig;

/// Pairwise relevance scorer; higher scores mean more relevant.
pub trait Reranker: Send + Sync {
    /// One score per passage, in passage order.
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

/// Cross-encoder served over HTTP (`POST {url}/rerank`, text-embeddings-inference
/// request and response shape).
pub struct HttpReranker {
    http: Client,
    endpoint: Url,
    model: Option<String>,
    batch_size: usize,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

impl HttpReranker {
    pub fn new(url: &str, model: Option<String>, batch_size: usize) -> Result<Self> {
        let base = Url::parse(url).with_context(|| format!("invalid reranker url {url:?}"))?;
        let endpoint = if base.path().ends_with("/rerank") {
            base
        } else {
            let path = format!("{}/rerank", base.path().trim_end_matches('/'));
            let mut endpoint = base;
            endpoint.set_path(&path);
            endpoint
        };
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reranker http client")?;
        Ok(Self {
            http,
            endpoint,
            model,
            batch_size: batch_size.max(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn score_batch(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let request = RerankRequest {
            query,
            texts: passages,
            model: self.model.as_deref(),
        };
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .with_context(|| format!("rerank request to {} failed", self.endpoint))?;
        if !response.status().is_success() {
            return Err(anyhow!("rerank request failed: {}", response.status()));
        }
        let hits: Vec<RerankHit> = response.json()?;
        scores_in_order(hits, passages.len())
    }
}

impl Reranker for HttpReranker {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(passages.len());
        for batch in passages.chunks(self.batch_size) {
            scores.extend(self.score_batch(query, batch)?);
        }
        Ok(scores)
    }
}

fn scores_in_order(hits: Vec<RerankHit>, expected: usize) -> Result<Vec<f32>> {
    let mut slots: Vec<Option<f32>> = vec![None; expected];
    for hit in hits {
        let slot = slots
            .get_mut(hit.index)
            .ok_or_else(|| anyhow!("rerank hit index {} out of range", hit.index))?;
        *slot = Some(hit.score);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(idx, score)| score.ok_or_else(|| anyhow!("rerank response missing passage {idx}")))
        .collect()
}

/// Builds the configured reranker. Absent or broken rerankers degrade to
/// unranked retrieval instead of failing startup.
pub fn load_reranker(config: &RerankConfig) -> Option<Arc<dyn Reranker>> {
    let Some(url) = config.url.as_deref() else {
        if let Some(model) = &config.model {
            warn!(model = %model, "reranker model configured without RERANK_URL; reranking disabled");
        }
        return None;
    };
    match HttpReranker::new(url, config.model.clone(), config.batch_size) {
        Ok(reranker) => {
            info!(endpoint = %reranker.endpoint(), "reranker enabled");
            Some(Arc::new(reranker))
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "reranker unavailable; continuing without reranking");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_are_realigned_to_passage_order() {
        let hits = vec![
            RerankHit {
                index: 2,
                score: 0.1,
            },
            RerankHit {
                index: 0,
                score: 0.9,
            },
            RerankHit {
                index: 1,
                score: 0.5,
            },
        ];
        assert_eq!(scores_in_order(hits, 3).unwrap(), vec![0.9, 0.5, 0.1]);
    }

    #[test]
    fn incomplete_responses_are_errors() {
        let hits = vec![RerankHit {
            index: 0,
            score: 0.9,
        }];
        assert!(scores_in_order(hits, 2).is_err());
        let hits = vec![RerankHit {
            index: 5,
            score: 0.9,
        }];
        assert!(scores_in_order(hits, 2).is_err());
    }

    #[test]
    fn endpoint_gets_rerank_path() {
        let reranker = HttpReranker::new("http://localhost:8080", None, 32).unwrap();
        assert_eq!(reranker.endpoint().as_str(), "http://localhost:8080/rerank");
        let reranker = HttpReranker::new("http://localhost:8080/rerank", None, 32).unwrap();
        assert_eq!(reranker.endpoint().as_str(), "http://localhost:8080/rerank");
    }

    #[test]
    fn load_failures_are_not_fatal() {
        let config = RerankConfig {
            model: Some("BAAI/bge-reranker-large".into()),
            url: Some("not a url".into()),
            batch_size: 32,
        };
        assert!(load_reranker(&config).is_none());
        assert!(load_reranker(&RerankConfig::default()).is_none());
    }
}
