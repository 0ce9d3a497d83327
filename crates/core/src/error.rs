use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("vector index error: {0}")]
    Index(String),
    #[error("chunk store has {chunks} chunks but vector index has {rows} rows")]
    Misaligned { chunks: usize, rows: usize },
    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("corpus is empty: {0}")]
    EmptyCorpus(&'static str),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    pub fn embedding(err: anyhow::Error) -> Self {
        Self::Embedding(format!("{err:#}"))
    }

    pub fn index(err: anyhow::Error) -> Self {
        Self::Index(format!("{err:#}"))
    }
}

impl From<anyhow::Error> for RagError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(format!("{value:#}"))
    }
}
