//! Local Embedding Provider
//!
//! fastembed (ONNX) inference, fully offline. The 768-dim model output is
//! Matryoshka-truncated to 256 dims and L2-normalized before it leaves the
//! provider.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Mutex, OnceLock};

use super::{matryoshka_truncate, EmbeddingProvider};
use crate::providers::ProviderError;

/// Dimensions after Matryoshka truncation (768 → 256).
pub const LOCAL_EMBEDDING_DIMENSIONS: usize = 256;

/// Model identifier reported in cost records.
pub const LOCAL_EMBEDDING_MODEL: &str = "nomic-ai/nomic-embed-text-v1.5";

/// Maximum text length fed to the model (truncated beyond this).
const MAX_TEXT_LENGTH: usize = 8192;

/// Lazily initialized global model. Initialization failure is cached so
/// every later call reports the same error instead of re-downloading.
static EMBEDDING_MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "engram", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, ProviderError> {
    let result = EMBEDDING_MODEL.get_or_init(|| {
        let cache_dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!("Failed to create embedding cache directory {:?}: {}", cache_dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(cache_dir);

        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("failed to initialize embedding model: {}", e))
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| ProviderError::Failed(format!("model lock poisoned: {}", e))),
        Err(err) => Err(ProviderError::Unavailable(err.clone())),
    }
}

/// Local ONNX embedding provider.
pub struct LocalEmbeddingProvider;

impl LocalEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }

    /// Force model initialization (downloads on first run); used at startup
    /// so failures surface before the first tool call.
    pub fn init() -> Result<(), ProviderError> {
        get_model().map(|_| ())
    }
}

impl Default for LocalEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    fn name(&self) -> &str {
        LOCAL_EMBEDDING_MODEL
    }

    fn dimensions(&self) -> usize {
        LOCAL_EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let text = text.to_string();
        // ONNX inference is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let mut model = get_model()?;

            let clipped = if text.len() > MAX_TEXT_LENGTH {
                let mut end = MAX_TEXT_LENGTH;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                &text[..end]
            } else {
                text.as_str()
            };

            let embeddings = model
                .embed(vec![clipped], None)
                .map_err(|e| ProviderError::Failed(e.to_string()))?;

            let vector = embeddings
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::Failed("no embedding generated".to_string()))?;

            Ok(matryoshka_truncate(vector, LOCAL_EMBEDDING_DIMENSIONS))
        })
        .await
        .map_err(|e| ProviderError::Failed(format!("embedding task panicked: {}", e)))?
    }
}
