//! Services layer.
//!
//! Services own lifecycles and sit between callers and the infrastructure:
//!
//! ```text
//!   CLI / embedding application
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//! Infrastructure (Embedding, Storage, Providers)
//! ```
//!
//! # Services Overview
//!
//! - [`RetrievalIndex`]: Embedding model plus vector store; insert and search chunks
//! - [`EngineManager`]: Single managed generation engine with streamed output
//! - [`RagContext`]: Explicitly passed context holding both

mod context;
mod engine_manager;
mod retrieval_index;

pub use crate::embedding::{RagError, RagResult};
pub use context::{engine_loader, RagContext};
pub use engine_manager::{EngineConfig, EngineError, EngineManager, EngineState, EngineStatus};
pub use retrieval_index::{RetrievalIndex, StoreSummary};
