//! Deterministic local embedding provider.
//!
//! Derives a normalized vector from the SHA-256 of the text. Not a semantic
//! model: identical text maps to identical vectors and distinct text spreads
//! roughly uniformly, which is exactly what the engine and its tests need
//! when no ML backend is configured. Real models register under their own
//! names and replace this at store creation.

use sha2::{Digest, Sha256};

use crate::features::providers::EmbeddingProvider;
use crate::shared::models::Result;

#[derive(Debug)]
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // Stretch the 32 digest bytes across the dimension by re-hashing
        // with a counter, then L2-normalize.
        let mut values = Vec::with_capacity(self.dimension);
        let mut round = 0u32;
        while values.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(round.to_le_bytes());
            hasher.update(text.as_bytes());
            for byte in hasher.finalize() {
                if values.len() >= self.dimension {
                    break;
                }
                values.push(byte as f32 / 255.0 - 0.5);
            }
            round += 1;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut values {
                *value /= norm;
            }
        }
        Ok(values)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hash-v1"
    }
}
