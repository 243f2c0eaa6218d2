//! Application context wiring retrieval and generation together.

use std::sync::Arc;

use crate::config::{ConfigError, GenerationBackend, GenerationSettings, Settings};
use crate::providers::ai::{
    EngineLoader, OllamaLoader, OpenAiCompatibleLoader, OLLAMA_DEFAULT_URL,
    OPENAI_COMPATIBLE_DEFAULT_URL,
};

use super::engine_manager::{EngineConfig, EngineManager};
use super::retrieval_index::RetrievalIndex;

/// Builds the engine loader selected by `settings.backend`.
pub fn engine_loader(settings: &GenerationSettings) -> Arc<dyn EngineLoader> {
    match settings.backend {
        GenerationBackend::Ollama => Arc::new(OllamaLoader::with_url(
            settings.base_url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL),
        )),
        GenerationBackend::OpenaiCompatible => Arc::new(OpenAiCompatibleLoader::new(
            settings
                .base_url
                .as_deref()
                .unwrap_or(OPENAI_COMPATIBLE_DEFAULT_URL),
            settings.api_key.clone(),
        )),
    }
}

/// Owns the retrieval index and the shared engine manager.
///
/// Retrieval and generation stay independent: nothing here feeds search
/// results into prompts.
#[derive(Debug)]
pub struct RagContext {
    pub index: RetrievalIndex,
    pub engine: Arc<EngineManager>,
}

impl RagContext {
    pub fn new(index: RetrievalIndex, engine: Arc<EngineManager>) -> Self {
        Self { index, engine }
    }

    /// Builds both halves from settings. Nothing is loaded yet.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let index = RetrievalIndex::from_settings(settings)?;
        let engine = EngineManager::new(
            engine_loader(&settings.generation),
            EngineConfig::from(&settings.generation),
        );

        Ok(Self::new(index, Arc::new(engine)))
    }

    /// Unloads the engine and closes the index.
    pub async fn shutdown(&mut self) {
        self.engine.dispose_engine().await;
        self.index.terminate().await;
    }
}
