//! Knowledge Graph Types
//!
//! Typed named nodes and typed directed edges with free-form property maps.
//! Traversal and path discovery live on the storage layer; this module owns
//! the record types, the well-known property keys, and the memory-strength
//! relevance score used as the default ranking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::records::Metadata;

// ============================================================================
// WELL-KNOWN PROPERTY KEYS
// ============================================================================

/// Edge property: structural classification (`"constitutive"` gets an IEF
/// multiplier).
pub const PROP_EDGE_TYPE: &str = "edge_type";
/// Edge property: traversal hit counter, proxies memory strength.
pub const PROP_ACCESS_COUNT: &str = "access_count";
/// Edge property: id of the edge that retired this one.
pub const PROP_SUPERSEDED_BY: &str = "superseded_by";
/// Edge property: last computed memory strength, persisted for inspection.
pub const PROP_MEMORY_STRENGTH: &str = "memory_strength";

// ============================================================================
// RECORDS
// ============================================================================

/// A typed named entity. `name` is unique per `label`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    /// Category (e.g. "technology", "person", "problem").
    pub label: String,
    pub name: String,
    #[serde(default)]
    pub properties: Metadata,
    /// Insight whose embedding is this node's semantic anchor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A typed directed relation between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    /// Relation name (e.g. `USES`, `SOLVES`, `DEPENDS_ON`, `constitutive`).
    pub relation: String,
    /// Non-negative.
    pub weight: f64,
    #[serde(default)]
    pub properties: Metadata,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl GraphEdge {
    /// Traversal hit counter, defaulting to 0 when unset.
    pub fn access_count(&self) -> i64 {
        self.properties
            .get(PROP_ACCESS_COUNT)
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }

    /// Structural edge classification, when present.
    pub fn edge_type(&self) -> Option<&str> {
        self.properties.get(PROP_EDGE_TYPE).and_then(|v| v.as_str())
    }

    /// Id of the superseding edge, when this edge has been retired.
    pub fn superseded_by(&self) -> Option<&str> {
        self.properties
            .get(PROP_SUPERSEDED_BY)
            .and_then(|v| v.as_str())
    }

    /// Whether this edge is excluded from default traversals.
    pub fn is_superseded(&self) -> bool {
        self.superseded_by().is_some()
    }
}

// ============================================================================
// TRAVERSAL PARAMETERS & RESULTS
// ============================================================================

/// Edge direction filter for neighbour traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

impl Direction {
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "outgoing" | "out" => Some(Direction::Outgoing),
            "incoming" | "in" => Some(Direction::Incoming),
            "both" => Some(Direction::Both),
            _ => None,
        }
    }
}

/// One neighbour produced by a bounded traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighbor {
    pub node_id: String,
    pub label: String,
    pub name: String,
    #[serde(default)]
    pub properties: Metadata,
    /// Edge that reached this node.
    pub edge_id: String,
    /// Relation of the edge that reached this node.
    pub relation: String,
    /// Hop count from the start node (1-based).
    pub distance: u32,
    pub weight: f64,
    /// Memory-strength relevance of the reaching edge.
    pub relevance_score: f64,
    /// Present when IEF ranking was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ief_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ief_components: Option<crate::ief::IefComponents>,
}

/// One hop in a discovered path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStep {
    pub node_id: String,
    pub name: String,
    pub label: String,
    /// Relation of the edge taken to reach this step; None for the start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    /// Edge taken to reach this step; None for the start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
}

/// Result of a shortest-path search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResult {
    pub path_found: bool,
    /// Hop count of the shortest path; 0 when none was found.
    pub path_length: u32,
    /// Up to 10 shortest paths, each a step sequence.
    pub paths: Vec<Vec<PathStep>>,
    /// Mean IEF over the best path's edges, when IEF was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_ief_score: Option<f64>,
}

// ============================================================================
// EDGE RELEVANCE (memory strength + Ebbinghaus decay)
// ============================================================================

/// Memory-strength relevance of an edge, bounded to [0, 1].
///
/// Strength saturates with traversal hits (0.5 for an untouched edge,
/// approaching 1.0 with use) and decays with the age of `last_accessed`
/// following `exp(-Δt / τ)`.
pub fn calculate_relevance_score(
    access_count: i64,
    last_accessed: DateTime<Utc>,
    now: DateTime<Utc>,
    tau_days: f64,
) -> f64 {
    let hits = access_count.max(0) as f64;
    let strength = 1.0 - 0.5 * (-hits / 5.0).exp();

    let age_days = ((now - last_accessed).num_seconds() as f64 / 86_400.0).max(0.0);
    let decay = (-age_days / tau_days.max(f64::EPSILON)).exp();

    (strength * decay).clamp(0.0, 1.0)
}

// ============================================================================
// TESTS
// ============================================================================
