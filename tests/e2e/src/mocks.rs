//! Deterministic mock providers.
//!
//! The embedding mock derives a vector from token counts so the same text
//! always embeds identically and related texts land near each other. The
//! scorer mocks either replay scripted scores or fail on demand, which is
//! how the retry and partial-success paths get exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use engram_core::{EmbeddingProvider, ProviderError, RelevanceScorer};

/// Dimension used by every mock provider.
pub const MOCK_DIMENSIONS: usize = 16;

// ============================================================================
// EMBEDDINGS
// ============================================================================

/// Deterministic, offline embedding provider.
pub struct MockEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock/deterministic"
    }

    fn dimensions(&self) -> usize {
        MOCK_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vector = vec![0.0f32; MOCK_DIMENSIONS];
        for token in text.to_lowercase().split_whitespace() {
            let mut hash: u32 = 2166136261;
            for byte in token.bytes() {
                hash ^= byte as u32;
                hash = hash.wrapping_mul(16777619);
            }
            vector[(hash as usize) % MOCK_DIMENSIONS] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        Ok(vector.into_iter().map(|x| x / norm).collect())
    }
}

/// Embedding provider that fails transiently `failures` times, then
/// delegates to the deterministic mock.
pub struct FlakyEmbeddingProvider {
    remaining_failures: AtomicU32,
    inner: MockEmbeddingProvider,
}

impl FlakyEmbeddingProvider {
    pub fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
            inner: MockEmbeddingProvider,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbeddingProvider {
    fn name(&self) -> &str {
        "mock/flaky"
    }

    fn dimensions(&self) -> usize {
        MOCK_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Unavailable("mock outage".into()));
        }
        self.inner.embed(text).await
    }
}

// ============================================================================
// SCORERS
// ============================================================================

/// Scorer that returns a scripted score per document content. Keyed by
/// content (not call order) because the pipeline grades documents
/// concurrently.
pub struct ScriptedScorer {
    model: &'static str,
    scores: HashMap<String, f64>,
}

impl ScriptedScorer {
    pub fn new(model: &'static str, pairs: &[(&str, f64)]) -> Self {
        Self {
            model,
            scores: pairs
                .iter()
                .map(|(doc, score)| (doc.to_string(), *score))
                .collect(),
        }
    }
}

#[async_trait]
impl RelevanceScorer for ScriptedScorer {
    fn model(&self) -> &str {
        self.model
    }

    async fn score(&self, _query: &str, document: &str) -> Result<f64, ProviderError> {
        self.scores
            .get(document)
            .copied()
            .ok_or_else(|| ProviderError::Failed(format!("unscripted document ({} chars)", document.len())))
    }
}

/// Scorer that always fails transiently; exercises the neutral-0.5 path.
pub struct DownScorer;

#[async_trait]
impl RelevanceScorer for DownScorer {
    fn model(&self) -> &str {
        "mock/down"
    }

    async fn score(&self, _query: &str, _document: &str) -> Result<f64, ProviderError> {
        Err(ProviderError::Unavailable("mock judge outage".into()))
    }
}
