//! Integrative Evaluation Function
//!
//! Fuses memory-strength relevance, semantic similarity, recency, and
//! constitutive weight into a single ranking score, minus a penalty for
//! edges under a pending nuance review. Pure: identical inputs yield
//! bit-identical outputs; the only upstream non-determinism lives in the
//! providers that produce the embeddings.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::IefConfig;
use crate::embeddings::cosine_similarity;

// ============================================================================
// INPUT / OUTPUT TYPES
// ============================================================================

/// The slice of edge state the scorer reads.
///
/// The semantic anchor is the embedding of the insight linked via the
/// *source* node's `vector_id`, falling back to the target node's — the
/// source asserts the relation, so its anchor best represents the claim.
#[derive(Debug, Clone)]
pub struct IefEdgeData {
    pub edge_id: String,
    /// Memory-strength relevance from the graph layer, in [0, 1].
    pub relevance_score: f64,
    /// When the edge was last modified; None yields a neutral recency.
    pub modified_at: Option<DateTime<Utc>>,
    /// `properties.edge_type`, when set.
    pub edge_type: Option<String>,
    /// Embedding of the linked insight, when one exists.
    pub anchor_embedding: Option<Vec<f32>>,
}

/// Per-component breakdown, echoed to callers for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IefComponents {
    pub relevance_score: f64,
    pub semantic_similarity: f64,
    pub recency_boost: f64,
    pub constitutive_weight: f64,
    pub nuance_penalty: f64,
}

/// Weight vector echoed alongside every score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IefWeights {
    pub relevance: f64,
    pub similarity: f64,
    pub recency: f64,
    pub constitutive: f64,
}

/// A computed IEF score with its breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IefScore {
    /// Fused score, clamped to [0, 1.5].
    pub ief_score: f64,
    pub components: IefComponents,
    pub weights: IefWeights,
}

// ============================================================================
// SCORING
// ============================================================================

/// Recency boost `exp(-Δdays / τ)`; 0.5 when the timestamp is absent.
pub fn recency_boost(modified_at: Option<DateTime<Utc>>, now: DateTime<Utc>, tau_days: f64) -> f64 {
    match modified_at {
        Some(t) => {
            let age_days = ((now - t).num_seconds() as f64 / 86_400.0).max(0.0);
            (-age_days / tau_days.max(f64::EPSILON)).exp()
        }
        None => 0.5,
    }
}

/// Cosine similarity rescaled from [-1, 1] to [0, 1]; 0.5 (neutral) when
/// either vector is absent or the dimensions mismatch.
pub fn semantic_similarity(query: Option<&[f32]>, anchor: Option<&[f32]>) -> f64 {
    match (query, anchor) {
        (Some(q), Some(a)) if q.len() == a.len() && !q.is_empty() => {
            let c = cosine_similarity(q, a) as f64;
            (c + 1.0) / 2.0
        }
        _ => 0.5,
    }
}

/// Compute the IEF score for one edge.
///
/// `pending_nuance_edge_ids` is the set published by the dissonance engine;
/// membership costs a fixed penalty.
pub fn calculate_ief_score(
    edge: &IefEdgeData,
    query_embedding: Option<&[f32]>,
    pending_nuance_edge_ids: Option<&HashSet<String>>,
    now: DateTime<Utc>,
    config: &IefConfig,
) -> IefScore {
    let relevance = edge.relevance_score.clamp(0.0, 1.0);
    let similarity = semantic_similarity(query_embedding, edge.anchor_embedding.as_deref());
    let recency = recency_boost(edge.modified_at, now, config.recency_tau_days);

    let constitutive = if edge.edge_type.as_deref() == Some("constitutive") {
        config.constitutive_multiplier
    } else {
        1.0
    };

    let nuance_penalty = match pending_nuance_edge_ids {
        Some(pending) if pending.contains(&edge.edge_id) => config.nuance_penalty,
        _ => 0.0,
    };

    let weights = IefWeights {
        relevance: config.relevance_weight,
        similarity: config.similarity_weight,
        recency: config.recency_weight,
        constitutive: config.constitutive_weight,
    };

    let fused = relevance * weights.relevance
        + similarity * weights.similarity
        + recency * weights.recency
        + constitutive * weights.constitutive
        - nuance_penalty;

    IefScore {
        ief_score: fused.clamp(0.0, 1.5),
        components: IefComponents {
            relevance_score: relevance,
            semantic_similarity: similarity,
            recency_boost: recency,
            constitutive_weight: constitutive,
            nuance_penalty,
        },
        weights,
    }
}

// ============================================================================
// TESTS
// ============================================================================
