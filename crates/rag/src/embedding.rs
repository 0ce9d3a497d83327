use std::env;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;

use ibtikar_core::{Embedder, HashEmbedder, HashEmbedderConfig};

use crate::config::{EmbeddingConfig, EmbeddingProvider};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
}

/// Embedding backend selected from configuration.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let backend = match config.provider {
            EmbeddingProvider::OpenAi => EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(
                &config.model,
                &config.base_url,
            )?),
            EmbeddingProvider::Hash => EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                dimensions: config.hash_dimensions,
                seed: 1337,
            })),
        };
        Ok(Self { backend })
    }
}

impl Embedder for EmbeddingClient {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => embedder.embed(texts),
            EmbeddingBackend::OpenAi(client) => client.embed_batch(texts),
        }
    }

    fn dimensions(&self) -> Option<usize> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Embedder::dimensions(embedder),
            EmbeddingBackend::OpenAi(_) => None,
        }
    }
}

/// Client for OpenAI-compatible `/embeddings` endpoints, including
/// self-hosted bge-m3 servers.
#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    endpoint: String,
    api_key: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(model: &str, base_url: &str) -> Result<Self> {
        let api_key = env::var("EMBEDDING_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                anyhow!("EMBEDDING_API_KEY or OPENAI_API_KEY is required for openai embeddings")
            })?;
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build embeddings http client")?;
        Ok(Self {
            http,
            model: model.to_string(),
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .with_context(|| format!("embeddings request to {} failed", self.endpoint))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "embeddings request failed: {}",
                response.status()
            ));
        }
        let parsed: OpenAiEmbeddingResponse = response.json()?;
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        ensure!(
            data.len() == inputs.len(),
            "embeddings response has {} vectors for {} inputs",
            data.len(),
            inputs.len()
        );
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_backend_reports_dimensions() {
        let client = EmbeddingClient::from_config(&EmbeddingConfig {
            hash_dimensions: 48,
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(client.dimensions(), Some(48));
        let vectors = client
            .embed(&["Ibtikar".to_string(), "ابتكار".to_string()])
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == 48));
    }

    #[test]
    fn openai_response_is_reordered_by_index() {
        let raw = r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#;
        let parsed: OpenAiEmbeddingResponse = serde_json::from_str(raw).unwrap();
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        assert_eq!(data[0].embedding, vec![1.0]);
    }
}
