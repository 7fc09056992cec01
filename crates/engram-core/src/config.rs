//! Typed Configuration
//!
//! One configuration document covers every tunable in the engine: fusion
//! weights, retry policy, working-memory capacity, timeouts, relational
//! keyword lists, and the IEF weight vector. Loaded from a TOML file and
//! merged with environment overrides; every section has calibrated
//! defaults so a missing file is not an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};

// ============================================================================
// SECTIONS
// ============================================================================

/// Fusion weights for the hybrid retrieval engine.
///
/// Weights multiply each ranked list's reciprocal-rank contribution; they
/// are calibrated per query class rather than forced to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub semantic: f64,
    pub keyword: f64,
    pub graph: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            keyword: 0.3,
            graph: 0.0,
        }
    }
}

/// Retrieval engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Default result count when the caller does not specify one.
    pub default_top_k: usize,
    /// Each source list fetches `top_k * candidate_multiplier` candidates.
    pub candidate_multiplier: usize,
    /// Reciprocal-rank fusion constant.
    pub rrf_k: f64,
    /// Weights for standard (non-relational) queries.
    pub weights: FusionWeights,
    /// Weights when graph injection is enabled for a standard query.
    pub graph_weights: FusionWeights,
    /// Weights when the query is classified relational.
    pub relational_weights: FusionWeights,
    /// Whether graph-anchored evidence participates in fusion at all.
    pub graph_injection: bool,
    /// Minimum cosine similarity for dense candidates.
    pub min_semantic_similarity: f32,
    /// Relational cue words, English.
    pub relational_keywords_en: Vec<String>,
    /// Relational cue words, German.
    pub relational_keywords_de: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            candidate_multiplier: 2,
            rrf_k: 60.0,
            weights: FusionWeights::default(),
            graph_weights: FusionWeights {
                semantic: 0.6,
                keyword: 0.2,
                graph: 0.2,
            },
            relational_weights: FusionWeights {
                semantic: 0.4,
                keyword: 0.2,
                graph: 0.4,
            },
            graph_injection: true,
            min_semantic_similarity: 0.3,
            relational_keywords_en: [
                "related",
                "relationship",
                "depends",
                "dependency",
                "uses",
                "connected",
                "connection",
                "between",
                "path",
                "linked",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            relational_keywords_de: [
                "zusammenhang",
                "beziehung",
                "abhängig",
                "verwendet",
                "verbindung",
                "verknüpft",
                "zwischen",
                "pfad",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Working-memory capacity policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingMemoryConfig {
    /// Maximum item count after any successful update.
    pub capacity: usize,
    /// Items above this importance are critical and exempt from standard
    /// LRU eviction.
    pub critical_threshold: f64,
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            critical_threshold: 0.8,
        }
    }
}

/// Retry policy for outbound provider calls.
///
/// Delays follow `base * factor^attempt`, multiplied by a jitter factor in
/// `[jitter_low, jitter_high]`. Only transient failures are retried.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub jitter_low: f64,
    pub jitter_high: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1000,
            factor: 2.0,
            jitter_low: 0.8,
            jitter_high: 1.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), with jitter applied.
    pub fn delay(&self, attempt: u32, jitter: f64) -> std::time::Duration {
        let base = self.base_delay_ms as f64 * self.factor.powi(attempt as i32);
        let jitter = jitter.clamp(self.jitter_low, self.jitter_high);
        std::time::Duration::from_millis((base * jitter) as u64)
    }
}

/// Per-operation deadlines, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// End-to-end budget for one tool call.
    pub request_ms: u64,
    /// Hybrid search budget.
    pub hybrid_search_ms: u64,
    /// Graph neighbour traversal budget (depth ≤ 3 target).
    pub graph_traversal_ms: u64,
    /// Shortest-path budget (≤ 5 hops target).
    pub graph_path_ms: u64,
    /// Single outbound provider call budget.
    pub provider_call_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 5_000,
            hybrid_search_ms: 1_000,
            graph_traversal_ms: 100,
            graph_path_ms: 400,
            provider_call_ms: 10_000,
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Required dimension of every persisted vector. The bundled local
    /// provider produces 256-dim Matryoshka-truncated vectors; reference
    /// deployments with a hosted provider configure 1536.
    pub dimensions: usize,
    /// Query-embedding LRU cache capacity.
    pub query_cache_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: 256,
            query_cache_size: 100,
        }
    }
}

/// IEF weight vector and decay constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IefConfig {
    pub relevance_weight: f64,
    pub similarity_weight: f64,
    pub recency_weight: f64,
    pub constitutive_weight: f64,
    /// Recency boost time constant, in days.
    pub recency_tau_days: f64,
    /// Multiplier applied to constitutive edges.
    pub constitutive_multiplier: f64,
    /// Penalty for edges under a pending nuance review.
    pub nuance_penalty: f64,
    /// Ebbinghaus time constant for edge relevance decay, in days.
    pub relevance_tau_days: f64,
}

impl Default for IefConfig {
    fn default() -> Self {
        Self {
            relevance_weight: 0.30,
            similarity_weight: 0.25,
            recency_weight: 0.20,
            constitutive_weight: 0.25,
            recency_tau_days: 30.0,
            constitutive_multiplier: 1.5,
            nuance_penalty: 0.1,
            relevance_tau_days: 30.0,
        }
    }
}

/// Dissonance engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DissonanceConfig {
    /// Relation pairs considered mutually exclusive on the same node pair.
    pub contradictory_relations: Vec<(String, String)>,
}

impl Default for DissonanceConfig {
    fn default() -> Self {
        Self {
            contradictory_relations: vec![
                ("USES".to_string(), "AVOIDS".to_string()),
                ("SOLVES".to_string(), "CAUSES".to_string()),
                ("DEPENDS_ON".to_string(), "INCOMPATIBLE_WITH".to_string()),
            ],
        }
    }
}

// ============================================================================
// ROOT DOCUMENT
// ============================================================================

/// The complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngramConfig {
    /// Data directory override; platform default when absent.
    pub data_dir: Option<PathBuf>,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub working_memory: WorkingMemoryConfig,
    pub retry: RetryPolicy,
    pub timeouts: TimeoutConfig,
    pub ief: IefConfig,
    pub dissonance: DissonanceConfig,
}

impl EngramConfig {
    /// Load from a TOML file, then apply environment overrides.
    ///
    /// A missing file yields defaults; a malformed file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text).map_err(|e| {
                    EngramError::Validation(format!("config file {}: {}", p.display(), e))
                })?
            }
            _ => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment-specific overrides for the knobs operators actually turn.
    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("ENGRAM_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(capacity) = env_parse::<usize>("ENGRAM_WORKING_CAPACITY") {
            self.working_memory.capacity = capacity;
        }
        if let Some(threshold) = env_parse::<f64>("ENGRAM_CRITICAL_THRESHOLD") {
            self.working_memory.critical_threshold = threshold;
        }
        if let Some(dims) = env_parse::<usize>("ENGRAM_EMBEDDING_DIMENSIONS") {
            self.embedding.dimensions = dims;
        }
    }

    /// Reject configurations that would violate engine invariants.
    pub fn validate(&self) -> Result<()> {
        if self.working_memory.capacity == 0 {
            return Err(EngramError::field("working_memory.capacity", "must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.working_memory.critical_threshold) {
            return Err(EngramError::field(
                "working_memory.critical_threshold",
                "must be in [0, 1]",
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(EngramError::field("embedding.dimensions", "must be >= 1"));
        }
        if self.retrieval.rrf_k <= 0.0 {
            return Err(EngramError::field("retrieval.rrf_k", "must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngramError::field("retry.max_attempts", "must be >= 1"));
        }
        if self.retry.jitter_low > self.retry.jitter_high {
            return Err(EngramError::field(
                "retry.jitter_low",
                "must not exceed retry.jitter_high",
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

// ============================================================================
// TESTS
// ============================================================================
