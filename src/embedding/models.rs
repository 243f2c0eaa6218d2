//! Embedding model definitions and configuration.
//!
//! Known sentence-transformer checkpoints that the Candle backend can load,
//! with their native widths and input conventions.

use serde::{Deserialize, Serialize};

/// Known embedding model types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// All-MiniLM-L6-v2 - balanced speed and quality.
    #[default]
    AllMiniLmL6V2,
    /// Paraphrase multilingual MiniLM - 50+ languages including Japanese.
    MultilingualMiniLm,
    /// BGE-Small - optimized for retrieval tasks.
    BgeSmall,
    /// Multilingual E5-Small - asymmetric query/passage search.
    MultilingualE5Small,
}

impl ModelType {
    /// All known models, in display order.
    pub const ALL: [ModelType; 4] = [
        Self::AllMiniLmL6V2,
        Self::MultilingualMiniLm,
        Self::BgeSmall,
        Self::MultilingualE5Small,
    ];

    /// Returns the Hugging Face model ID.
    pub fn hf_model_id(&self) -> &'static str {
        match self {
            Self::AllMiniLmL6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::MultilingualMiniLm => {
                "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2"
            }
            Self::BgeSmall => "BAAI/bge-small-en-v1.5",
            Self::MultilingualE5Small => "intfloat/multilingual-e5-small",
        }
    }

    /// Looks up a known model by its Hugging Face ID.
    pub fn from_model_id(model_id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.hf_model_id() == model_id)
    }

    /// Returns the native embedding dimension.
    pub fn embedding_dim(&self) -> usize {
        384
    }

    /// Returns the maximum sequence length.
    pub fn max_seq_length(&self) -> usize {
        match self {
            Self::AllMiniLmL6V2 => 256,
            Self::MultilingualMiniLm => 128,
            Self::BgeSmall => 512,
            Self::MultilingualE5Small => 512,
        }
    }

    /// Returns the query prefix if required.
    pub fn query_prefix(&self) -> Option<&'static str> {
        match self {
            Self::MultilingualE5Small => Some("query: "),
            Self::BgeSmall => Some("Represent this sentence for searching relevant passages: "),
            _ => None,
        }
    }

    /// Returns the document prefix if required.
    pub fn document_prefix(&self) -> Option<&'static str> {
        match self {
            Self::MultilingualE5Small => Some("passage: "),
            _ => None,
        }
    }
}

/// Numeric precision used to run the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Full 32-bit floats.
    #[default]
    F32,
    /// Half precision; smaller and faster on GPUs.
    F16,
}

impl Precision {
    pub fn dtype(&self) -> candle_core::DType {
        match self {
            Self::F32 => candle_core::DType::F32,
            Self::F16 => candle_core::DType::F16,
        }
    }
}

/// Information about a model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Model type.
    pub model_type: ModelType,
    /// Human-readable name.
    pub name: String,
    /// Description of the model.
    pub description: String,
    /// Approximate download size in bytes.
    pub size_bytes: u64,
}

impl ModelInfo {
    /// Creates info for a model type.
    pub fn for_model(model_type: ModelType) -> Self {
        let (name, description, size_bytes) = match model_type {
            ModelType::AllMiniLmL6V2 => (
                "All-MiniLM-L6-v2",
                "Balanced English model with good quality and speed",
                90_000_000,
            ),
            ModelType::MultilingualMiniLm => (
                "Multilingual-MiniLM-L12-v2",
                "Paraphrase model covering 50+ languages",
                470_000_000,
            ),
            ModelType::BgeSmall => (
                "BGE-Small",
                "Optimized for retrieval and semantic search",
                130_000_000,
            ),
            ModelType::MultilingualE5Small => (
                "Multilingual-E5-Small",
                "Asymmetric query/passage search across languages",
                470_000_000,
            ),
        };

        Self {
            model_type,
            name: name.to_string(),
            description: description.to_string(),
            size_bytes,
        }
    }

    /// Returns info for every known model.
    pub fn all() -> Vec<Self> {
        ModelType::ALL.into_iter().map(Self::for_model).collect()
    }

    /// Returns the size as a human-readable string.
    pub fn size_human(&self) -> String {
        let mb = self.size_bytes as f64 / 1_000_000.0;
        format!("{:.1} MB", mb)
    }
}
