//! hearth - Local retrieval-augmented generation building blocks
//!
//! This crate provides a persistent SQLite vector store fed by local text
//! embeddings, and a lifecycle manager for a single local LLM engine that
//! streams its output. The two halves are independent; [`services::RagContext`]
//! holds both.

pub mod config;
pub mod domain;
pub mod embedding;
pub mod providers;
pub mod services;
pub mod storage;

pub use services::{EngineManager, RagContext, RetrievalIndex};
