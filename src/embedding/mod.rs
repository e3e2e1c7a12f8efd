//! Embedding generation and similarity
//!
//! Wraps an external embedding provider: text in, fixed-length vector out,
//! with deterministic token estimation up front and a usage record emitted
//! on every successful call. Ledger failures never fail the embed.

mod tfidf;

pub use tfidf::TfIdfEmbedder;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{MnemoError, Result};
use crate::storage::{usage_queries, Storage};
use crate::types::{EmbeddingConfig, Provider, UsageRecord};

/// Provider call timeout
const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for embedding providers
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get model name
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;
}

/// OpenAI-compatible embedding client
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| MnemoError::Config("embedding api_key required".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: config.model.clone(),
            dimensions: config.dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": text,
                "model": self.model,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MnemoError::Provider(format!(
                "embedding API error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let vector: Vec<f32> = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| MnemoError::Provider("invalid embedding response format".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Create a provider from configuration: API key present means the remote
/// model, otherwise the local TF-IDF fallback
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    if config.api_key.is_some() {
        Ok(Arc::new(OpenAiEmbedder::new(config)?))
    } else {
        Ok(Arc::new(TfIdfEmbedder::new(config.dimension)))
    }
}

static TOKENIZER: Lazy<Option<tiktoken_rs::CoreBPE>> = Lazy::new(|| tiktoken_rs::cl100k_base().ok());

/// Deterministic token estimate, no external call
pub fn estimate_tokens(text: &str) -> usize {
    match TOKENIZER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        // rough fallback when the tokenizer data cannot be loaded
        None => text.len().div_ceil(4),
    }
}

/// Result of a successful embed call
#[derive(Debug, Clone)]
pub struct EmbeddingOutcome {
    pub vector: Vec<f32>,
    pub tokens: i64,
    pub duration_ms: u64,
}

/// Embedding service: provider + cost accounting
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    storage: Storage,
    price_per_million_tokens: f64,
}

impl EmbeddingService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        storage: Storage,
        config: &EmbeddingConfig,
    ) -> Self {
        Self {
            provider,
            storage,
            price_per_million_tokens: config.price_per_million_tokens,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Deterministic cost estimate, no external call
    pub fn estimate_cost(&self, text: &str) -> f64 {
        estimate_tokens(text) as f64 * self.price_per_million_tokens / 1_000_000.0
    }

    /// Embed a text for a user, emitting a usage record on success.
    ///
    /// `INVALID_ARGUMENT` for empty input; `PROVIDER_ERROR`/`TIMEOUT` for
    /// transport issues. A failed ledger write is logged and swallowed.
    pub async fn embed(&self, text: &str, user_id: &str) -> Result<EmbeddingOutcome> {
        if text.trim().is_empty() {
            return Err(MnemoError::InvalidArgument(
                "cannot embed empty text".to_string(),
            ));
        }

        let tokens = estimate_tokens(text) as i64;
        let started = Instant::now();

        let vector = tokio::time::timeout(EMBED_TIMEOUT, self.provider.embed(text))
            .await
            .map_err(|_| MnemoError::Timeout("embedding provider call".to_string()))??;

        if vector.len() != self.provider.dimensions() {
            return Err(MnemoError::Provider(format!(
                "provider returned {} dimensions, expected {}",
                vector.len(),
                self.provider.dimensions()
            )));
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let cost_usd = tokens as f64 * self.price_per_million_tokens / 1_000_000.0;

        let record = UsageRecord::new(
            user_id,
            Provider::Embedding,
            self.provider.model_name(),
            tokens,
            cost_usd,
            "embedding",
        );
        let ledger_write = self
            .storage
            .with_connection(|conn| usage_queries::append_usage_record(conn, &record));
        if let Err(e) = ledger_write {
            tracing::warn!(user_id, error = %e, "usage ledger write failed, continuing");
        }

        Ok(EmbeddingOutcome {
            vector,
            tokens,
            duration_ms,
        })
    }
}

/// Cosine similarity between two vectors, in [-1, 1]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Rank candidates against a query vector: filter by threshold, sort
/// descending, truncate
pub fn rank_by_similarity<T>(
    query: &[f32],
    candidates: Vec<(T, Vec<f32>)>,
    threshold: f32,
    limit: usize,
) -> Vec<(f32, T)> {
    let mut scored: Vec<(f32, T)> = candidates
        .into_iter()
        .filter_map(|(item, vector)| {
            let similarity = cosine_similarity(query, &vector);
            (similarity >= threshold).then_some((similarity, item))
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_rank_by_similarity() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            ("exact", vec![1.0, 0.0]),
            ("orthogonal", vec![0.0, 1.0]),
            ("close", vec![0.9, 0.1]),
        ];

        let ranked = rank_by_similarity(&query, candidates, 0.5, 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].1, "exact");
        assert_eq!(ranked[1].1, "close");

        // threshold 0 keeps everything
        let candidates = vec![("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])];
        let ranked = rank_by_similarity(&query, candidates, 0.0, 10);
        assert_eq!(ranked.len(), 2);

        // limit truncates
        let candidates = vec![
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.9, 0.1]),
            ("c", vec![0.8, 0.2]),
        ];
        let ranked = rank_by_similarity(&query, candidates, 0.0, 2);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_estimate_tokens_nonzero() {
        assert!(estimate_tokens("hello world, this is a test") > 0);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_cost_is_deterministic() {
        let storage = crate::storage::Storage::open_in_memory().unwrap();
        let config = EmbeddingConfig {
            price_per_million_tokens: 1.0,
            api_key: None,
            ..Default::default()
        };
        // no api key configured: the local fallback provider
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "tfidf");

        let service = EmbeddingService::new(provider, storage, &config);
        let text = "hello world";
        let expected = estimate_tokens(text) as f64 / 1_000_000.0;
        assert!((service.estimate_cost(text) - expected).abs() < 1e-12);
    }
}
