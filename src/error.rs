use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the retrieval core.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("the index holds no documents; build it before searching")]
    EmptyIndex,
    #[error("no input to build from: {0}")]
    EmptyInput(String),
    #[error("document {id} not found (store holds {count})")]
    NotFound { id: usize, count: usize },
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("failed to ingest '{}': {reason}", .path.display())]
    Ingestion { path: PathBuf, reason: String },
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("answer generation failed: {0}")]
    Generation(String),
    #[error("snapshot error: {0}")]
    Persistence(String),
}

impl RagError {
    pub fn ingestion<P: Into<PathBuf>, E: std::fmt::Display>(path: P, err: E) -> Self {
        RagError::Ingestion {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub fn embedding<E: std::fmt::Display>(err: E) -> Self {
        RagError::Embedding(err.to_string())
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
