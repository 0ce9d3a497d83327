use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ibtikar_core::{RagError, Result};
use serde::Deserialize;

use crate::allowlist::{SourceAllowlist, DEFAULT_ALLOW_DOMAINS, DEFAULT_SENTINEL};

pub const DEFAULT_CONFIG: &str = "ibtikar.toml";
pub const DEFAULT_RECALL_K: usize = 60;
pub const DEFAULT_TOP_K: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Hash,
    OpenAi,
}

impl EmbeddingProvider {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "hash" => Some(EmbeddingProvider::Hash),
            "openai" => Some(EmbeddingProvider::OpenAi),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProvider::Hash => "hash",
            EmbeddingProvider::OpenAi => "openai",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub base_url: String,
    pub hash_dimensions: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            model: "BAAI/bge-m3".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            hash_dimensions: 256,
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub model: Option<String>,
    pub url: Option<String>,
    pub batch_size: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            model: None,
            url: None,
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub index_path: PathBuf,
    pub docs_path: PathBuf,
    pub embedding: EmbeddingConfig,
    pub rerank: RerankConfig,
    pub recall_k: usize,
    pub top_k: usize,
    pub allow_domains: Vec<String>,
    pub allow_sentinel: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("vectorstore/index.bin"),
            docs_path: PathBuf::from("vectorstore/docs.json"),
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
            recall_k: DEFAULT_RECALL_K,
            top_k: DEFAULT_TOP_K,
            allow_domains: DEFAULT_ALLOW_DOMAINS.iter().map(|d| d.to_string()).collect(),
            allow_sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    retrieval: RetrievalConfig,
}

impl RetrievalConfig {
    /// Defaults, then the TOML file (if present), then process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| {
            env::var("IBTIKAR_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG))
        });
        let mut config = Self::from_file(&path)?;
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str::<FileConfig>(contents)
            .map(|cfg| cfg.retrieval)
            .map_err(|err| RagError::InvalidConfig(err.to_string()))
    }

    /// Overlays environment-style options read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("INDEX_PATH") {
            self.index_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DOCS_JSON_PATH") {
            self.docs_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = EmbeddingProvider::from_str(&v).ok_or_else(|| {
                RagError::InvalidConfig(format!("unknown embedding provider {v}"))
            })?;
        }
        if let Some(v) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Some(v) = lookup("HASH_EMBED_DIMENSIONS") {
            self.embedding.hash_dimensions = parse_usize("HASH_EMBED_DIMENSIONS", &v)?;
        }
        if let Some(v) = lookup("EMBED_BATCH_SIZE") {
            self.embedding.batch_size = parse_usize("EMBED_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("RERANK_MODEL") {
            self.rerank.model = non_empty(v);
        }
        if let Some(v) = lookup("RERANK_URL") {
            self.rerank.url = non_empty(v);
        }
        if let Some(v) = lookup("RECALL_K") {
            self.recall_k = parse_usize("RECALL_K", &v)?;
        }
        if let Some(v) = lookup("TOP_K") {
            self.top_k = parse_usize("TOP_K", &v)?;
        }
        if let Some(v) = lookup("ALLOW_DOMAINS") {
            self.allow_domains = v
                .split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
        }
        if let Some(v) = lookup("ALLOW_SENTINEL") {
            self.allow_sentinel = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.recall_k == 0 {
            return Err(RagError::InvalidConfig("recall_k must be > 0".into()));
        }
        if self.top_k == 0 {
            return Err(RagError::InvalidConfig("top_k must be > 0".into()));
        }
        if self.embedding.hash_dimensions == 0 {
            return Err(RagError::InvalidConfig(
                "hash embedding dimensions must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn allowlist(&self) -> SourceAllowlist {
        SourceAllowlist::new(&self.allow_domains, self.allow_sentinel.clone())
    }
}

fn parse_usize(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| RagError::InvalidConfig(format!("{key} must be a non-negative integer, got {raw:?}")))
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
