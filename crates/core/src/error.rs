use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilingError {
    #[error("malformed document: {0}")]
    MalformedDocument(String),
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("generation provider unavailable: {0}")]
    GenerationUnavailable(String),
    #[error("scoring provider unavailable: {0}")]
    ScoringUnavailable(String),
    #[error("model output failed validation: {0}")]
    ValidationFailure(String),
    #[error("store write failed: {0}")]
    StoreWriteFailure(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FilingError>;

impl From<anyhow::Error> for FilingError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
