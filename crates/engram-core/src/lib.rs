//! # Engram Core
//!
//! Cognitive memory engine for LLM-driven agents. A tiered,
//! content-addressable store of conversational and derived knowledge:
//!
//! - **Tiered memory**: append-only L0 raw dialogue, compressed L2
//!   insights with embeddings and provenance, a bounded working set with
//!   transactional LRU eviction, a stale archive, and reflection episodes
//! - **Hybrid retrieval**: dense (HNSW) + lexical (FTS5/BM25) + optional
//!   graph-anchored evidence, fused with weighted Reciprocal Rank Fusion
//! - **Knowledge graph**: typed nodes, typed directed edges with property
//!   maps, bounded traversal, shortest-path discovery
//! - **IEF**: an integrative evaluation function fusing memory strength,
//!   semantic similarity, recency, and constitutive weight, minus
//!   dissonance penalties
//! - **Dual judges**: two independent relevance scorers with Cohen's κ
//!   agreement
//! - **Dissonance engine**: contradiction detection with pending nuance
//!   reviews and supersede semantics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{EngramConfig, Storage};
//!
//! let config = EngramConfig::load(None)?;
//! let storage = Storage::new(&config)?;
//!
//! // Append raw dialogue
//! let entry = storage.append_raw(&DialogueInput {
//!     session_id: "s-1".into(),
//!     speaker: "user".into(),
//!     content: "we decided on SQLite".into(),
//!     metadata: Default::default(),
//! })?;
//!
//! // Bounded working memory with importance-aware eviction
//! let update = storage.update_working_memory("active topic: storage", 0.6)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local ONNX embedding provider via fastembed
//! - `vector-search` (default): HNSW dense search via USearch
//! - `full`: everything

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod dissonance;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod ief;
pub mod judges;
pub mod memory;
pub mod providers;
pub mod retrieval;
pub mod search;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{
    DissonanceConfig, EmbeddingConfig, EngramConfig, FusionWeights, IefConfig, RetrievalConfig,
    RetryPolicy, TimeoutConfig, WorkingMemoryConfig,
};

pub use error::{EngramError, Result};

pub use memory::{
    ApiCostRecord, ArchiveReason, DialogueInput, Episode, EpisodeInput, GroundTruthRecord, Insight,
    InsightInput, Metadata, RawEntry, StaleItem, WorkingItem, WorkingUpdate,
};

pub use storage::Storage;

pub use graph::{
    calculate_relevance_score, Direction, GraphEdge, GraphNode, Neighbor, PathResult, PathStep,
};

pub use ief::{calculate_ief_score, IefComponents, IefEdgeData, IefScore, IefWeights};

pub use dissonance::{DissonanceEngine, NuanceReview, Resolution, ReviewStatus};

pub use judges::{
    cohen_kappa, DualJudgeOutcome, DualJudgePipeline, EmbeddingCosineScorer, JudgedDoc,
    LexicalOverlapScorer, RelevanceScorer, NEUTRAL_SCORE,
};

pub use providers::{estimate_tokens, retry_with_backoff, CostRecorder, ProviderError};

pub use embeddings::{cosine_similarity, Embedding, EmbeddingClient, EmbeddingProvider};

#[cfg(feature = "embeddings")]
pub use embeddings::{LocalEmbeddingProvider, LOCAL_EMBEDDING_DIMENSIONS, LOCAL_EMBEDDING_MODEL};

pub use retrieval::{HybridSearchResult, RetrievalEngine, SearchCounts, SearchHit};

pub use search::{classify_query, sanitize_fts5_query, weighted_rrf, QueryType, RankedList};

#[cfg(feature = "vector-search")]
pub use search::{VectorIndex, VectorIndexConfig};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        DialogueInput, DissonanceEngine, DualJudgePipeline, EngramConfig, EngramError,
        EpisodeInput, InsightInput, Result, RetrievalEngine, Storage,
    };

    pub use crate::{EmbeddingClient, EmbeddingProvider, RelevanceScorer};

    #[cfg(feature = "embeddings")]
    pub use crate::LocalEmbeddingProvider;
}
