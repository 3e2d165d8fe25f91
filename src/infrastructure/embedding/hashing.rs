//! Offline embedding service based on feature hashing

use async_trait::async_trait;

use crate::domain::{DomainError, EmbeddingService};
use crate::infrastructure::text::tokenize;

pub const DEFAULT_HASHING_DIMENSIONS: usize = 256;

/// Deterministic bag-of-words embeddings.
///
/// Each token and each adjacent token pair is hashed into a fixed number of
/// buckets and the vector is L2-normalized, so texts sharing vocabulary have
/// positive cosine similarity. Used when no embedding endpoint is configured.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingService {
    dimensions: usize,
}

impl HashingEmbeddingService {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimensions];

        for token in &tokens {
            self.accumulate(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.accumulate(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }

        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let bucket = (hash % self.dimensions as u64) as usize;
        vector[bucket] += weight;
    }
}

impl Default for HashingEmbeddingService {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingService for HashingEmbeddingService {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DomainError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
