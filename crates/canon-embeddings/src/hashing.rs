//! Local feature-hashing embedder.
//!
//! Hashes word tokens and character trigrams into a fixed number of signed
//! buckets and L2-normalizes the result. Needs no network and is fully
//! deterministic, which makes it the embedder of choice for offline runs and
//! tests. Similarity is lexical only.

use async_trait::async_trait;

use canon_core::error::{CanonError, CanonResult};
use canon_core::traits::{Embedder, EmbedderConfig};

/// Word tokens weigh more than trigrams.
const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

pub struct HashingEmbedder {
    dims: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> CanonResult<Self> {
        if dims == 0 {
            return Err(CanonError::Configuration(
                "hashing embedder needs at least one dimension".to_string(),
            ));
        }
        Ok(Self {
            dims,
            model: format!("hashing-{}", dims),
        })
    }

    pub fn from_config(config: &EmbedderConfig) -> CanonResult<Self> {
        Self::new(config.embedding_dims)
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = md5::compute(feature.as_bytes()).0;
        let bucket = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]) % self.dims as u64;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket as usize] += sign * weight;
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dims];
        let normalized = text.to_lowercase();

        for word in normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add_feature(&mut vector, word, WORD_WEIGHT);

            let padded: Vec<char> = format!(" {} ", word).chars().collect();
            for trigram in padded.windows(3) {
                let trigram: String = trigram.iter().collect();
                self.add_feature(&mut vector, &trigram, TRIGRAM_WEIGHT);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> CanonResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(CanonError::embedding("cannot embed empty text"));
        }
        Ok(self.vectorize(text))
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_core::vector::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(256).unwrap();
        let a = embedder.embed("Acme Corporation").await.unwrap();
        let b = embedder.embed("acme   corporation").await.unwrap();

        assert_eq!(a.len(), 256);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_lexical_similarity() {
        let embedder = HashingEmbedder::new(512).unwrap();
        let acme = embedder.embed("Acme anvil company").await.unwrap();
        let acme_inc = embedder.embed("Acme anvil company inc").await.unwrap();
        let river = embedder.embed("slow muddy river").await.unwrap();

        assert!(cosine_similarity(&acme, &acme_inc) > 0.8);
        assert!(cosine_similarity(&acme, &river) < cosine_similarity(&acme, &acme_inc));
    }

    #[tokio::test]
    async fn test_rejects_empty_input_and_zero_dims() {
        assert!(HashingEmbedder::new(0).is_err());
        let embedder = HashingEmbedder::new(8).unwrap();
        assert!(matches!(
            embedder.embed("   ").await,
            Err(CanonError::Embedding { .. })
        ));
        assert_eq!(embedder.model_name(), "hashing-8");
    }
}
