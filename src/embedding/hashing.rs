//! Feature-hashing embedder.
//!
//! A deterministic bag-of-words embedding that needs no model download.
//! Each lower-cased alphanumeric token is hashed with FNV-1a into one of
//! `dimension` buckets, with the hash's top bit choosing the sign. The result
//! is L2-normalised, so texts sharing more tokens sit closer together.

use async_trait::async_trait;

use super::error::{EmbeddingError, EmbeddingResult};
use super::provider::{Embedding, EmbeddingProvider};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic, dependency-free embedding provider.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Creates an embedder producing vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }

    fn fnv1a(token: &str) -> u64 {
        token.bytes().fold(FNV_OFFSET, |hash, byte| {
            (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
        })
    }

    /// Embeds synchronously. Returns `None` when the text has no tokens.
    pub fn embed_sync(&self, text: &str) -> Option<Embedding> {
        let mut values = vec![0.0f32; self.dimension];
        let mut seen = false;

        for token in Self::tokens(text) {
            let hash = Self::fnv1a(&token);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            values[bucket] += sign;
            seen = true;
        }

        seen.then(|| Embedding::new(values).normalized())
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> EmbeddingResult<Embedding> {
        self.embed_sync(text).ok_or(EmbeddingError::NoOutput)
    }
}
