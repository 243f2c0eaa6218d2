//! Application settings and configuration types.
//!
//! Settings are persisted to `~/.config/hearth/settings.json` (or the platform
//! equivalent) and loaded at startup. Missing fields fall back to defaults, so
//! a partial file is valid.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::Precision;
use crate::storage::{schema, StoreLocation, DB_FILENAME};

const SETTINGS_FILENAME: &str = "settings.json";

/// Errors from loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No home directory available for default paths")]
    NoProjectDirs,

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("dev", "hearth", "hearth").ok_or(ConfigError::NoProjectDirs)
}

/// Top-level application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where the vector store lives.
    pub storage: StorageSettings,
    /// Embedding model configuration.
    pub embedding: EmbeddingSettings,
    /// Local generation engine configuration.
    pub generation: GenerationSettings,
    /// Retrieval defaults.
    pub search: SearchSettings,
}

impl Settings {
    /// Default settings file location.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(project_dirs()?.config_dir().join(SETTINGS_FILENAME))
    }

    /// Loads settings from `path`, or defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Writes settings to `path` as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !schema::is_valid_table_name(&self.storage.table_name) {
            return Err(ConfigError::Invalid(format!(
                "storage.table_name {:?} is not a plain identifier",
                self.storage.table_name
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        if self.search.default_limit == 0 {
            return Err(ConfigError::Invalid(
                "search.default_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Vector store location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Database file. Defaults to `hearth.db` in the data directory.
    pub db_path: Option<PathBuf>,
    /// Name of the records table.
    pub table_name: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            table_name: schema::DEFAULT_TABLE.to_string(),
        }
    }
}

impl StorageSettings {
    /// Resolves the configured store location.
    pub fn location(&self) -> Result<StoreLocation, ConfigError> {
        match &self.db_path {
            Some(path) => Ok(StoreLocation::File(path.clone())),
            None => Ok(StoreLocation::File(
                project_dirs()?.data_dir().join(DB_FILENAME),
            )),
        }
    }
}

/// Which embedding implementation to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Local BERT model run with Candle.
    #[default]
    Candle,
    /// Feature hashing; no model download.
    Hash,
}

/// Embedding model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    /// Hugging Face model identifier.
    pub model_id: String,
    /// Width of every stored vector.
    pub dimension: usize,
    pub precision: Precision,
    /// Load model files from here instead of the hub.
    pub model_dir: Option<PathBuf>,
    pub use_gpu: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Candle,
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            precision: Precision::F32,
            model_dir: None,
            use_gpu: false,
        }
    }
}

/// Which generation runtime to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationBackend {
    /// Ollama daemon; models are pulled on initialize.
    #[default]
    Ollama,
    /// Any OpenAI-compatible server (llama.cpp, vLLM, LM Studio).
    OpenaiCompatible,
}

/// Local generation engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub backend: GenerationBackend,
    /// Runtime endpoint. Defaults per backend when unset.
    pub base_url: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Bearer token, for servers that require one.
    pub api_key: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens in a response.
    pub max_tokens: u32,
    /// Sent ahead of every prompt when set.
    pub system_prompt: Option<String>,
    /// Upper bound on model load, including download.
    pub load_timeout_secs: u64,
    /// Upper bound on the wait between streamed deltas.
    pub stream_idle_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            backend: GenerationBackend::Ollama,
            base_url: None,
            model: "llama3.2:1b".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 512,
            system_prompt: None,
            load_timeout_secs: 600,
            stream_idle_timeout_secs: 120,
        }
    }
}

/// Retrieval defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Number of results when the caller gives no limit.
    pub default_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { default_limit: 5 }
    }
}
