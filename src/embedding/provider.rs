//! Embedding provider abstraction.
//!
//! An [`EmbeddingProvider`] turns text into a fixed-length [`Embedding`].
//! Providers are loaded through an [`EmbeddingLoader`] so the retrieval index
//! can defer model loading until `initialize()`.

use std::sync::Arc;

use async_trait::async_trait;

use super::candle::CandleEmbedder;
use super::error::EmbeddingResult;
use super::hashing::HashEmbedder;
use crate::config::{EmbeddingBackend, EmbeddingSettings};

/// A vector embedding representing text semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// The embedding vector.
    pub values: Vec<f32>,
}

impl Embedding {
    /// Creates a new embedding from a vector of values.
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Returns the dimensionality of this embedding.
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance to another embedding of the same width.
    ///
    /// Returns `None` when the widths differ.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }

        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();

        Some(sum.sqrt())
    }

    /// Returns a copy scaled to unit L2 norm. A zero vector is returned as is.
    pub fn normalized(mut self) -> Self {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            self.values.iter_mut().for_each(|x| *x /= norm);
        }
        self
    }
}

/// A text-embedding model producing vectors of a fixed dimension.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Width of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embeds a document.
    ///
    /// Fails with [`EmbeddingError::NoOutput`](super::EmbeddingError::NoOutput)
    /// when the model yields nothing for the input.
    async fn embed(&self, text: &str) -> EmbeddingResult<Embedding>;

    /// Embeds a search query. Models with asymmetric prefixes override this.
    async fn embed_query(&self, text: &str) -> EmbeddingResult<Embedding> {
        self.embed(text).await
    }
}

/// Deferred construction of an embedding provider.
#[async_trait]
pub trait EmbeddingLoader: Send + Sync {
    /// Loads (downloading if needed) and returns a ready provider.
    async fn load(&self) -> EmbeddingResult<Arc<dyn EmbeddingProvider>>;
}

/// An already constructed provider loads as itself.
#[async_trait]
impl EmbeddingLoader for Arc<dyn EmbeddingProvider> {
    async fn load(&self) -> EmbeddingResult<Arc<dyn EmbeddingProvider>> {
        Ok(Arc::clone(self))
    }
}

/// Loads the provider described by [`EmbeddingSettings`].
#[derive(Debug, Clone)]
pub struct SettingsEmbeddingLoader {
    settings: EmbeddingSettings,
}

impl SettingsEmbeddingLoader {
    pub fn new(settings: EmbeddingSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl EmbeddingLoader for SettingsEmbeddingLoader {
    async fn load(&self) -> EmbeddingResult<Arc<dyn EmbeddingProvider>> {
        let settings = &self.settings;
        match settings.backend {
            EmbeddingBackend::Candle => {
                let embedder = CandleEmbedder::builder(
                    &settings.model_id,
                    settings.dimension,
                    settings.precision,
                )
                .with_model_dir(settings.model_dir.clone())
                .with_gpu(settings.use_gpu)
                .init()
                .await?;
                Ok(Arc::new(embedder))
            }
            EmbeddingBackend::Hash => {
                tracing::info!(
                    dimension = settings.dimension,
                    "Using feature-hashing embedder"
                );
                Ok(Arc::new(HashEmbedder::new(settings.dimension)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_dimension() {
        let embedding = Embedding::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(embedding.dimension(), 3);
    }

    #[test]
    fn euclidean_distance_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), Some(0.0));
    }

    #[test]
    fn euclidean_distance_known_value() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        let distance = a.euclidean_distance(&b).unwrap();
        assert!((distance - 5.0).abs() < 1e-6);
    }

    #[test]
    fn euclidean_distance_mismatched_dims() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), None);
    }

    #[test]
    fn normalized_has_unit_norm() {
        let e = Embedding::new(vec![3.0, 4.0]).normalized();
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalized_zero_vector_unchanged() {
        let e = Embedding::new(vec![0.0, 0.0]).normalized();
        assert_eq!(e.values, vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn hash_backend_loads_without_download() {
        let settings = EmbeddingSettings {
            backend: EmbeddingBackend::Hash,
            dimension: 64,
            ..EmbeddingSettings::default()
        };

        let provider = SettingsEmbeddingLoader::new(settings).load().await.unwrap();
        assert_eq!(provider.dimension(), 64);

        let embedding = provider.embed("hello world").await.unwrap();
        assert_eq!(embedding.dimension(), 64);
    }

    #[tokio::test]
    async fn provided_embedder_loads_as_itself() {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new(8));
        let loaded = provider.load().await.unwrap();
        assert!(Arc::ptr_eq(&provider, &loaded));
    }
}
