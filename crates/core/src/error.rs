use crate::models::{DocumentStatus, FileType};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("could not extract text from {file_type} document: {reason}")]
pub struct ExtractionError {
    pub file_type: FileType,
    pub reason: String,
}

impl ExtractionError {
    pub fn new(file_type: FileType, reason: impl Into<String>) -> Self {
        Self {
            file_type,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index corruption: {0}")]
    Corruption(String),
}

/// Failures of the primary embedding strategy. These never leave the embedder:
/// every one of them is answered with the hash fallback.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("embedding inference failed: {0}")]
    Inference(String),

    #[error("model produces {actual}-dimensional vectors, engine is configured for {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("document produced no chunks")]
    NoContent,

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("ingestion worker failed: {0}")]
    Task(String),

    #[error("document cannot move from {from} to {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
