//! Local LLM engine implementations.
//!
//! This module provides a unified interface for loading a model into a local
//! runtime and streaming completions from it.
//!
//! # Supported Runtimes
//!
//! - **Ollama**: models are pulled on load and unloaded on dispose
//! - **OpenAI-compatible**: llama.cpp server, vLLM, LM Studio
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use hearth::providers::ai::{CompletionRequest, EngineLoader, OllamaLoader};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = OllamaLoader::new();
//! let engine = loader
//!     .load("llama3.2:1b", Arc::new(|status: &str| println!("{status}")))
//!     .await?;
//!
//! let mut stream = engine.stream_complete(&CompletionRequest::prompt("Hello!")).await?;
//! while let Some(chunk) = stream.next().await {
//!     print!("{}", chunk?.text);
//! }
//! engine.dispose().await?;
//! # Ok(())
//! # }
//! ```

mod lines;
mod ollama;
mod openai;
mod traits;

pub use ollama::{OllamaEngine, OllamaLoader, OLLAMA_DEFAULT_URL};
pub use openai::{OpenAiCompatibleEngine, OpenAiCompatibleLoader, OPENAI_COMPATIBLE_DEFAULT_URL};
pub use traits::{
    CompletionRequest, CompletionStream, EngineLoader, FinishReason, GenerationEngine, LlmError,
    LlmResult, Message, ProgressCallback, Role, StreamChunk,
};
