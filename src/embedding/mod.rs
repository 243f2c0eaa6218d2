//! Vector embedding and semantic search.
//!
//! This module turns text into fixed-width vectors and keeps them in a
//! SQLite-backed store for nearest-neighbour retrieval.
//!
//! # Architecture
//!
//! - [`EmbeddingProvider`] - Text to [`Embedding`] (Candle BERT or feature hashing)
//! - [`EmbeddingLoader`] - Deferred provider construction
//! - [`VectorStore`] - Stores chunks and searches them by Euclidean distance
//!
//! # Example
//!
//! ```ignore
//! use hearth::embedding::{HashEmbedder, VectorStore};
//! use hearth::storage::StoreLocation;
//!
//! let mut store = VectorStore::new(
//!     StoreLocation::InMemory,
//!     "chunks",
//!     256,
//!     Arc::new(HashEmbedder::new(256)),
//! )?;
//! store.initialize().await?;
//! store.insert(&DocumentChunk::new("hello world", "notes.txt")).await?;
//! let results = store.search("hello", 5).await?;
//! ```

mod candle;
mod error;
mod hashing;
mod models;
mod provider;
mod vector_store;

pub use candle::{CandleEmbedder, CandleEmbedderBuilder};
pub use error::{EmbeddingError, EmbeddingResult, RagError, RagResult};
pub use hashing::HashEmbedder;
pub use models::{ModelInfo, ModelType, Precision};
pub use provider::{Embedding, EmbeddingLoader, EmbeddingProvider, SettingsEmbeddingLoader};
pub use vector_store::{VectorStore, DEFAULT_SEARCH_LIMIT};
