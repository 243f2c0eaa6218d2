//! Local sentence embeddings with Candle.
//!
//! Loads a BERT-family encoder (weights, config and tokenizer) either from a
//! local directory or from the Hugging Face hub cache, then embeds text with
//! attention-masked mean pooling. Vectors are truncated to the requested
//! dimension and L2-normalised.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::{Tokenizer, TruncationParams};

use super::error::{EmbeddingError, EmbeddingResult};
use super::models::{ModelType, Precision};
use super::provider::{Embedding, EmbeddingProvider};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

/// Sequence limit used for models outside the known registry.
const FALLBACK_MAX_SEQ_LENGTH: usize = 512;

/// Builder for [`CandleEmbedder`].
#[derive(Debug, Clone)]
pub struct CandleEmbedderBuilder {
    model_id: String,
    dimension: usize,
    precision: Precision,
    model_dir: Option<PathBuf>,
    use_gpu: bool,
}

impl CandleEmbedderBuilder {
    /// Loads files from `dir` instead of the hub.
    pub fn with_model_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.model_dir = dir;
        self
    }

    /// Runs on the first CUDA device when one is available.
    pub fn with_gpu(mut self, use_gpu: bool) -> Self {
        self.use_gpu = use_gpu;
        self
    }

    /// Downloads (if needed) and loads the model.
    ///
    /// Loading happens on the blocking pool; the first call for a hub model
    /// may take a while.
    pub async fn init(self) -> EmbeddingResult<CandleEmbedder> {
        tracing::info!(
            model_id = %self.model_id,
            dimension = self.dimension,
            precision = ?self.precision,
            "Loading embedding model"
        );

        let loaded = tokio::task::spawn_blocking(move || LoadedModel::load(&self))
            .await
            .map_err(|e| EmbeddingError::TaskFailed(e.to_string()))??;

        tracing::info!(model_id = %loaded.model_id, "Embedding model ready");

        Ok(CandleEmbedder {
            inner: Arc::new(loaded),
        })
    }
}

/// Embedding provider backed by a local Candle BERT model.
#[derive(Clone)]
pub struct CandleEmbedder {
    inner: Arc<LoadedModel>,
}

impl CandleEmbedder {
    /// Starts configuring an embedder for `model_id`.
    pub fn builder(
        model_id: impl Into<String>,
        dimension: usize,
        precision: Precision,
    ) -> CandleEmbedderBuilder {
        CandleEmbedderBuilder {
            model_id: model_id.into(),
            dimension,
            precision,
            model_dir: None,
            use_gpu: false,
        }
    }

    async fn embed_prefixed(&self, prefix: Option<&'static str>, text: &str) -> EmbeddingResult<Embedding> {
        let input = match prefix {
            Some(prefix) => format!("{prefix}{text}"),
            None => text.to_string(),
        };

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.embed(&input))
            .await
            .map_err(|e| EmbeddingError::TaskFailed(e.to_string()))?
    }
}

impl std::fmt::Debug for CandleEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleEmbedder")
            .field("model_id", &self.inner.model_id)
            .field("dimension", &self.inner.dimension)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EmbeddingProvider for CandleEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension
    }

    async fn embed(&self, text: &str) -> EmbeddingResult<Embedding> {
        let prefix = self.inner.model_type.and_then(|m| m.document_prefix());
        self.embed_prefixed(prefix, text).await
    }

    async fn embed_query(&self, text: &str) -> EmbeddingResult<Embedding> {
        let prefix = self.inner.model_type.and_then(|m| m.query_prefix());
        self.embed_prefixed(prefix, text).await
    }
}

struct LoadedModel {
    model_id: String,
    model_type: Option<ModelType>,
    dimension: usize,
    device: Device,
    model: BertModel,
    tokenizer: Tokenizer,
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    fn from_dir(dir: &Path) -> EmbeddingResult<Self> {
        let files = Self {
            config: dir.join(CONFIG_FILE),
            tokenizer: dir.join(TOKENIZER_FILE),
            weights: dir.join(WEIGHTS_FILE),
        };

        for path in [&files.config, &files.tokenizer, &files.weights] {
            if !path.exists() {
                return Err(EmbeddingError::Initialization(format!(
                    "{} not found",
                    path.display()
                )));
            }
        }

        Ok(files)
    }

    fn from_hub(model_id: &str) -> EmbeddingResult<Self> {
        let hub_err = |e: hf_hub::api::sync::ApiError| {
            EmbeddingError::Initialization(format!("Failed to fetch {model_id}: {e}"))
        };

        let api = hf_hub::api::sync::Api::new().map_err(hub_err)?;
        let repo = api.model(model_id.to_string());

        Ok(Self {
            config: repo.get(CONFIG_FILE).map_err(hub_err)?,
            tokenizer: repo.get(TOKENIZER_FILE).map_err(hub_err)?,
            weights: repo.get(WEIGHTS_FILE).map_err(hub_err)?,
        })
    }
}

impl LoadedModel {
    fn load(options: &CandleEmbedderBuilder) -> EmbeddingResult<Self> {
        let model_type = ModelType::from_model_id(&options.model_id);
        if model_type.is_none() {
            tracing::warn!(
                model_id = %options.model_id,
                "Unknown embedding model, loading as a generic BERT encoder"
            );
        }

        let files = match &options.model_dir {
            Some(dir) => ModelFiles::from_dir(dir)?,
            None => ModelFiles::from_hub(&options.model_id)?,
        };

        let device = if options.use_gpu {
            Device::cuda_if_available(0)?
        } else {
            Device::Cpu
        };

        let config_str = std::fs::read_to_string(&files.config).map_err(|e| {
            EmbeddingError::Initialization(format!("Failed to read config: {e}"))
        })?;
        let config: BertConfig = serde_json::from_str(&config_str).map_err(|e| {
            EmbeddingError::Initialization(format!("Failed to parse BERT config: {e}"))
        })?;

        if config.hidden_size < options.dimension {
            return Err(EmbeddingError::UnsupportedDimension {
                native: config.hidden_size,
                requested: options.dimension,
            });
        }

        let max_length = model_type
            .map(|m| m.max_seq_length())
            .unwrap_or(FALLBACK_MAX_SEQ_LENGTH);

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|e| {
            EmbeddingError::Initialization(format!("Failed to load tokenizer: {e}"))
        })?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;
        tokenizer.with_padding(None);

        // SAFETY: the weights file is not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], options.precision.dtype(), &device)?
        };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model_id: options.model_id.clone(),
            model_type,
            dimension: options.dimension,
            device,
            model,
            tokenizer,
        })
    }

    fn embed(&self, text: &str) -> EmbeddingResult<Embedding> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        if encoding.get_ids().is_empty() {
            return Err(EmbeddingError::NoOutput);
        }

        let ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let type_ids = Tensor::new(encoding.get_type_ids(), &self.device)?.unsqueeze(0)?;
        let mask = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;

        let hidden = self.model.forward(&ids, &type_ids, Some(&mask))?;

        // Mean over real tokens only.
        let mask = mask.to_dtype(hidden.dtype())?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?;
        let pooled = summed.broadcast_div(&counts)?;

        let values: Vec<f32> = pooled
            .squeeze(0)?
            .narrow(0, 0, self.dimension)?
            .to_dtype(DType::F32)?
            .to_vec1()?;

        if values.is_empty() {
            return Err(EmbeddingError::NoOutput);
        }

        Ok(Embedding::new(values).normalized())
    }
}
