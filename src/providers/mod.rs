//! Generation engine implementations.
//!
//! - [`ai`] - Local LLM runtimes (Ollama, OpenAI-compatible servers)

pub mod ai;
