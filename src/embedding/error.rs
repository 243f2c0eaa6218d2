//! Error types for embedding and retrieval.

use thiserror::Error;

use crate::storage::DatabaseError;

/// Errors raised by an embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Failed to load embedding model: {0}")]
    Initialization(String),

    #[error("Embedding model returned no output")]
    NoOutput,

    #[error("Inference failed: {0}")]
    Inference(#[from] candle_core::Error),

    #[error("Tokenization failed: {0}")]
    Tokenizer(String),

    #[error("Model produces {native}-component vectors, cannot serve dimension {requested}")]
    UnsupportedDimension { native: usize, requested: usize },

    #[error("Blocking task failed: {0}")]
    TaskFailed(String),
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Errors surfaced by the vector store and retrieval index.
#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding model or the backing store failed to load or open.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The embedder produced no vector for a document.
    #[error("Embedding data missing for: {content:?}")]
    MissingEmbedding { content: String },

    #[error("Embedding failed: {0}")]
    Embedding(EmbeddingError),

    #[error("Store query failed: {0}")]
    StoreQuery(#[from] DatabaseError),

    #[error("Vector has {actual} components, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Search limit must be at least 1")]
    InvalidLimit,

    #[error("Retrieval index not initialized. Call initialize() first.")]
    NotInitialized,
}

/// Result type for retrieval operations.
pub type RagResult<T> = Result<T, RagError>;

impl RagError {
    /// Maps an embedding failure for `content`, turning an empty model output
    /// into [`RagError::MissingEmbedding`].
    pub fn from_embedding(content: &str, error: EmbeddingError) -> Self {
        match error {
            EmbeddingError::NoOutput => Self::MissingEmbedding {
                content: content.chars().take(80).collect(),
            },
            other => Self::Embedding(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_output_maps_to_missing_embedding() {
        let err = RagError::from_embedding("hello", EmbeddingError::NoOutput);
        assert!(matches!(err, RagError::MissingEmbedding { ref content } if content == "hello"));
    }

    #[test]
    fn missing_embedding_preview_is_truncated() {
        let long = "x".repeat(500);
        match RagError::from_embedding(&long, EmbeddingError::NoOutput) {
            RagError::MissingEmbedding { content } => assert_eq!(content.len(), 80),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn other_errors_are_wrapped() {
        let err = RagError::from_embedding("hello", EmbeddingError::Tokenizer("bad".into()));
        assert!(matches!(err, RagError::Embedding(EmbeddingError::Tokenizer(_))));
    }
}
