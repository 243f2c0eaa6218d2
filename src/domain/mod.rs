//! Domain types shared by the retrieval and generation layers.
//!
//! - [`DocumentChunk`] - the unit of ingestion
//! - [`SearchResult`] - a ranked match with its distance score

mod chunk;

pub use chunk::{split_into_chunks, DocumentChunk, SearchResult};
