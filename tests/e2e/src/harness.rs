//! Test harness: a full engine wired against a temp-directory database
//! with the deterministic mock providers.

use std::sync::Arc;

use engram_core::{
    DissonanceEngine, EmbeddingClient, EmbeddingProvider, EngramConfig, RetrievalEngine,
    RetryPolicy, Storage,
};
use tempfile::TempDir;

use crate::mocks::{MockEmbeddingProvider, MOCK_DIMENSIONS};

/// A complete engine over a temporary database. The temp dir lives as
/// long as the harness.
pub struct TestHarness {
    pub config: EngramConfig,
    pub storage: Arc<Storage>,
    pub embedder: EmbeddingClient,
    pub retrieval: RetrievalEngine,
    pub dissonance: Arc<DissonanceEngine>,
    _dir: TempDir,
}

/// Millisecond-scale retry policy so failure-path tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        base_delay_ms: 1,
        factor: 2.0,
        jitter_low: 0.8,
        jitter_high: 1.2,
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_provider(Arc::new(MockEmbeddingProvider))
    }

    /// Build the harness around a specific embedding provider (e.g. the
    /// flaky one for retry tests).
    pub fn with_provider(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dir = TempDir::new().expect("temp dir");

        let mut config = EngramConfig::default();
        config.data_dir = Some(dir.path().to_path_buf());
        config.embedding.dimensions = MOCK_DIMENSIONS;
        config.retry = fast_retry();

        let storage = Arc::new(Storage::new(&config).expect("storage"));
        let embedder = EmbeddingClient::new(
            provider,
            &config.embedding,
            config.retry,
            &config.timeouts,
            None,
        );
        let retrieval = RetrievalEngine::new(Arc::clone(&storage), embedder.clone());
        let dissonance = Arc::new(DissonanceEngine::new(config.dissonance.clone()));

        Self {
            config,
            storage,
            embedder,
            retrieval,
            dissonance,
            _dir: dir,
        }
    }

    /// Insert an insight whose embedding comes from the mock provider.
    pub async fn seed_insight(&self, content: &str) -> engram_core::Insight {
        let embedding = self.embedder.embed(content).await.expect("embed");
        self.storage
            .insert_insight(
                &engram_core::InsightInput {
                    content: content.to_string(),
                    source_ids: vec![],
                    metadata: engram_core::Metadata::new(),
                },
                &embedding,
            )
            .expect("insert insight")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
