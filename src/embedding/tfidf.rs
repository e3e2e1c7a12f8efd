//! Hashed TF-IDF embedding fallback
//!
//! Deterministic, no external calls. Used when no provider API key is
//! configured, and by the test suite.
//!
//! Each token is feature-hashed with FNV-1a: the low bits pick the bucket
//! and the top bit picks the sign, so collisions tend to cancel instead of
//! piling up. Token weight is log-TF times a length-based IDF stand-in
//! (longer tokens are rarer in practice, and there is no corpus to compute
//! real document frequencies from).

use async_trait::async_trait;
use std::collections::HashMap;

use super::EmbeddingProvider;
use crate::error::Result;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Hashed TF-IDF embedder
pub struct TfIdfEmbedder {
    dimensions: usize,
}

impl TfIdfEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Lowercase words, punctuation stripped from the edges only, so
    /// hyphenated terms stay whole. Single characters carry no signal.
    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| w.len() > 1)
            .map(String::from)
            .collect()
    }

    fn feature_hash(token: &str) -> u64 {
        let mut hash = FNV_OFFSET;
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];

        if tokens.is_empty() {
            return embedding;
        }

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }

        for (token, count) in counts {
            let tf = 1.0 + (count as f32).ln();
            // length as an IDF proxy
            let idf = (token.len() as f32).sqrt();

            let hash = Self::feature_hash(token);
            let idx = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[idx] += tf * idf * sign;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            embedding.iter_mut().for_each(|x| *x /= norm);
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for TfIdfEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn model_name(&self) -> &str {
        "tfidf"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic() {
        let embedder = TfIdfEmbedder::new(384);
        let e1 = embedder.embed("hello world").await.unwrap();
        let e2 = embedder.embed("hello world").await.unwrap();
        assert_eq!(e1, e2);
    }

    #[tokio::test]
    async fn test_similarity_ordering() {
        let embedder = TfIdfEmbedder::new(384);

        let e1 = embedder
            .embed("the quick brown fox jumps over the lazy dog")
            .await
            .unwrap();
        let e2 = embedder
            .embed("a fast brown fox leaps over a sleepy dog")
            .await
            .unwrap();
        let e3 = embedder
            .embed("quantum physics and thermodynamics")
            .await
            .unwrap();

        assert!(cosine_similarity(&e1, &e2) > cosine_similarity(&e1, &e3));
    }

    #[tokio::test]
    async fn test_empty_is_zero_vector() {
        let embedder = TfIdfEmbedder::new(384);
        let e = embedder.embed("").await.unwrap();
        assert_eq!(e.len(), 384);
        assert!(e.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_l2_normalized() {
        let embedder = TfIdfEmbedder::new(384);
        let e = embedder
            .embed("this is a test sentence with multiple words")
            .await
            .unwrap();
        let norm: f32 = e.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_hyphenated_terms_stay_whole() {
        let embedder = TfIdfEmbedder::new(384);
        // "pour-over" hashes as one token, not as "pour" + "over"
        let hyphenated = embedder.embed("pour-over").await.unwrap();
        let split = embedder.embed("pour over").await.unwrap();
        assert!(cosine_similarity(&hyphenated, &split) < 0.999);
    }

    #[tokio::test]
    async fn test_repeated_tokens_weigh_more() {
        let embedder = TfIdfEmbedder::new(384);
        let once = embedder.embed("kernel panic logs").await.unwrap();
        let tripled = embedder.embed("kernel kernel kernel panic logs").await.unwrap();
        let query = embedder.embed("kernel").await.unwrap();
        assert!(cosine_similarity(&query, &tripled) > cosine_similarity(&query, &once));
    }
}
