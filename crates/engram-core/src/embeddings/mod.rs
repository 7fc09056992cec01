//! Semantic Embeddings
//!
//! The engine consumes dense vectors through the [`EmbeddingProvider`]
//! trait so deployments can plug in a hosted model or the bundled local
//! ONNX provider (feature `embeddings`). [`EmbeddingClient`] wraps a
//! provider with bounded retry, a per-call deadline, a query LRU cache,
//! and cost accounting.

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
mod local;

#[cfg(feature = "embeddings")]
pub use local::{LocalEmbeddingProvider, LOCAL_EMBEDDING_DIMENSIONS, LOCAL_EMBEDDING_MODEL};

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use lru::LruCache;

use crate::config::{EmbeddingConfig, RetryPolicy, TimeoutConfig};
use crate::error::{EngramError, Result};
use crate::memory::ApiCostRecord;
use crate::providers::{estimate_tokens, retry_with_backoff, CostRecorder, ProviderError};

// ============================================================================
// EMBEDDING TYPE
// ============================================================================

/// A dense vector with its dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dimensions: usize,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Self {
        let dimensions = vector.len();
        Self { vector, dimensions }
    }

    /// Cosine similarity; 0.0 on dimension mismatch.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        if self.dimensions != other.dimensions {
            return 0.0;
        }
        cosine_similarity(&self.vector, &other.vector)
    }

    /// Little-endian f32 bytes for BLOB storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Parse from BLOB bytes; None when the length is not a multiple of 4.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Some(Self::new(vector))
    }
}

// ============================================================================
// SIMILARITY FUNCTIONS
// ============================================================================

/// Cosine similarity between two vectors; 0.0 on length mismatch.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 { dot / denominator } else { 0.0 }
}

/// Truncate to `dims` and L2-normalize (Matryoshka representation: the
/// first N dims of a Matryoshka-trained vector are a valid N-dim vector).
#[inline]
pub fn matryoshka_truncate(mut vector: Vec<f32>, dims: usize) -> Vec<f32> {
    if vector.len() > dims {
        vector.truncate(dims);
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// A capability that turns text into a fixed-dimension dense vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name, for logging and cost accounting.
    fn name(&self) -> &str;

    /// Dimension of every vector this provider produces.
    fn dimensions(&self) -> usize;

    /// Embed one text. Transient failures are retried by the client.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError>;
}

// ============================================================================
// CLIENT
// ============================================================================

/// Provider wrapper carrying retry, deadline, cache, and accounting.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    call_timeout: std::time::Duration,
    dimensions: usize,
    query_cache: Arc<Mutex<LruCache<String, Vec<f32>>>>,
    costs: Option<Arc<dyn CostRecorder>>,
}

impl EmbeddingClient {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        embedding: &EmbeddingConfig,
        retry: RetryPolicy,
        timeouts: &TimeoutConfig,
        costs: Option<Arc<dyn CostRecorder>>,
    ) -> Self {
        let cache_size = NonZeroUsize::new(embedding.query_cache_size.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            retry,
            call_timeout: std::time::Duration::from_millis(timeouts.provider_call_ms),
            dimensions: embedding.dimensions,
            query_cache: Arc::new(Mutex::new(LruCache::new(cache_size))),
            costs,
        }
    }

    /// Configured vector dimension, enforced on every result.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Provider name, for result reporting.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Embed arbitrary text, with retry and deadline. Uncached.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        if text.is_empty() {
            return Err(EngramError::field("text", "must not be empty"));
        }

        let provider = Arc::clone(&self.provider);
        let timeout = self.call_timeout;
        let vector = retry_with_backoff(&self.retry, "embed", || {
            let provider = Arc::clone(&provider);
            let text = text.to_string();
            async move {
                match tokio::time::timeout(timeout, provider.embed(&text)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(format!(
                        "embedding exceeded {}ms",
                        timeout.as_millis()
                    ))),
                }
            }
        })
        .await
        .map_err(|e| EngramError::Embedding(e.to_string()))?;

        if vector.len() != self.dimensions {
            return Err(EngramError::Embedding(format!(
                "provider returned {} dimensions, expected {}",
                vector.len(),
                self.dimensions
            )));
        }

        self.record_cost("embed", text);
        Ok(Embedding::new(vector))
    }

    /// Embed a query, reusing the LRU cache for repeated query text.
    pub async fn embed_query(&self, query: &str) -> Result<Embedding> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vector) = cache.get(query) {
                return Ok(Embedding::new(vector.clone()));
            }
        }

        let embedding = self.embed(query).await?;

        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), embedding.vector.clone());
        }
        Ok(embedding)
    }

    fn record_cost(&self, operation: &str, text: &str) {
        if let Some(costs) = &self.costs {
            let tokens = estimate_tokens(text);
            costs.record_cost(ApiCostRecord {
                timestamp: Utc::now(),
                provider: self.provider.name().to_string(),
                operation: operation.to_string(),
                tokens,
                // Local providers cost nothing; hosted ones override via
                // their name-specific rate in the accounting views.
                estimated_cost: 0.0,
                query_id: None,
            });
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_embedding_bytes_roundtrip() {
        let original = Embedding::new(vec![1.5, -2.5, 3.25]);
        let restored = Embedding::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_embedding_from_bad_bytes() {
        assert!(Embedding::from_bytes(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_matryoshka_truncate_normalizes() {
        let truncated = matryoshka_truncate(vec![3.0, 4.0, 9.0, 9.0], 2);
        assert_eq!(truncated.len(), 2);
        let norm: f32 = truncated.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    struct FixedProvider {
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            self.dims
        }
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
            let seed = text.len() as f32;
            Ok((0..self.dims).map(|i| (i as f32 + seed).sin()).collect())
        }
    }

    fn test_client(dims: usize) -> EmbeddingClient {
        let config = EmbeddingConfig {
            dimensions: dims,
            query_cache_size: 10,
        };
        EmbeddingClient::new(
            Arc::new(FixedProvider { dims }),
            &config,
            RetryPolicy {
                base_delay_ms: 1,
                ..RetryPolicy::default()
            },
            &TimeoutConfig::default(),
            None,
        )
    }

    #[tokio::test]
    async fn test_client_enforces_dimensions() {
        // Provider emits 8 dims but config demands 16
        let config = EmbeddingConfig {
            dimensions: 16,
            query_cache_size: 10,
        };
        let client = EmbeddingClient::new(
            Arc::new(FixedProvider { dims: 8 }),
            &config,
            RetryPolicy::default(),
            &TimeoutConfig::default(),
            None,
        );
        let err = client.embed("hello").await.unwrap_err();
        assert_eq!(err.kind(), "EMBEDDING");
    }

    #[tokio::test]
    async fn test_client_rejects_empty_text() {
        let client = test_client(8);
        let err = client.embed("").await.unwrap_err();
        assert_eq!(err.kind(), "VALIDATION");
    }

    #[tokio::test]
    async fn test_query_cache_returns_same_vector() {
        let client = test_client(8);
        let first = client.embed_query("repeated query").await.unwrap();
        let second = client.embed_query("repeated query").await.unwrap();
        assert_eq!(first, second);
    }
}
