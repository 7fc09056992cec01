//! Dissonance / Nuance Review Engine
//!
//! Scans the knowledge graph for contradicting edges and keeps a
//! process-local registry of pending reviews. Two edges contradict when
//! they connect the same node pair with relations configured as mutually
//! exclusive, or with the same relation but opposing `stance` properties.
//!
//! The registry is owned by this engine behind a single-writer lock; the
//! IEF scorer consumes the published pending-edge set to apply penalties.
//! Resolution either clears the penalty (both edges stand) or retires one
//! edge by stamping `properties.superseded_by`, which excludes it from
//! default traversals.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DissonanceConfig;
use crate::error::{EngramError, Result};
use crate::graph::{GraphEdge, PROP_SUPERSEDED_BY};
use crate::storage::Storage;

/// Edge property carrying the claim polarity; opposing values on the same
/// relation contradict.
pub const PROP_STANCE: &str = "stance";

// ============================================================================
// REVIEW RECORDS
// ============================================================================

/// Lifecycle of a nuance review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Resolved,
    Superseded,
}

/// A pending adjudication of two contradicting edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NuanceReview {
    pub id: String,
    pub edge_a_id: String,
    pub edge_b_id: String,
    pub status: ReviewStatus,
    /// Human-readable account of the detected contradiction.
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

/// How a review is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Both edges stand; the penalty is lifted.
    Resolved,
    /// One edge survives; the other is retired via `superseded_by`.
    Supersede { surviving_edge_id: String },
}

// ============================================================================
// ENGINE
// ============================================================================

/// Owns the in-process review registry.
pub struct DissonanceEngine {
    config: DissonanceConfig,
    reviews: Mutex<Vec<NuanceReview>>,
}

impl DissonanceEngine {
    pub fn new(config: DissonanceConfig) -> Self {
        Self {
            config,
            reviews: Mutex::new(Vec::new()),
        }
    }

    /// Scan every edge pair on the same node pair for contradictions and
    /// register a PENDING review for each new one found. Returns the
    /// newly created reviews.
    pub fn scan(&self, storage: &Storage) -> Result<Vec<NuanceReview>> {
        let edges = storage.list_edges()?;

        // Group live edges by unordered node pair
        let mut by_pair: HashMap<(String, String), Vec<&GraphEdge>> = HashMap::new();
        for edge in edges.iter().filter(|e| !e.is_superseded()) {
            let key = if edge.source_id <= edge.target_id {
                (edge.source_id.clone(), edge.target_id.clone())
            } else {
                (edge.target_id.clone(), edge.source_id.clone())
            };
            by_pair.entry(key).or_default().push(edge);
        }

        let mut reviews = self
            .reviews
            .lock()
            .map_err(|_| EngramError::Internal("review registry lock poisoned".into()))?;

        let known_pairs: HashSet<(String, String)> = reviews
            .iter()
            .filter(|r| r.status == ReviewStatus::Pending)
            .map(|r| ordered_pair(&r.edge_a_id, &r.edge_b_id))
            .collect();

        let mut created = Vec::new();
        for pair_edges in by_pair.values() {
            for (i, a) in pair_edges.iter().enumerate() {
                for b in pair_edges.iter().skip(i + 1) {
                    let Some(reason) = self.contradiction(a, b) else {
                        continue;
                    };
                    if known_pairs.contains(&ordered_pair(&a.id, &b.id)) {
                        continue;
                    }

                    let review = NuanceReview {
                        id: Uuid::new_v4().to_string(),
                        edge_a_id: a.id.clone(),
                        edge_b_id: b.id.clone(),
                        status: ReviewStatus::Pending,
                        reason,
                        detected_at: Utc::now(),
                    };
                    tracing::info!(
                        edge_a = %review.edge_a_id,
                        edge_b = %review.edge_b_id,
                        "dissonance detected: {}",
                        review.reason
                    );
                    reviews.push(review.clone());
                    created.push(review);
                }
            }
        }
        Ok(created)
    }

    /// Whether two edges on the same node pair contradict; the reason when
    /// they do.
    fn contradiction(&self, a: &GraphEdge, b: &GraphEdge) -> Option<String> {
        let exclusive = self.config.contradictory_relations.iter().any(|(r1, r2)| {
            (a.relation == *r1 && b.relation == *r2) || (a.relation == *r2 && b.relation == *r1)
        });
        if exclusive {
            return Some(format!(
                "relations '{}' and '{}' are mutually exclusive",
                a.relation, b.relation
            ));
        }

        if a.relation == b.relation {
            let stance_a = a.properties.get(PROP_STANCE).and_then(|v| v.as_str());
            let stance_b = b.properties.get(PROP_STANCE).and_then(|v| v.as_str());
            if let (Some(sa), Some(sb)) = (stance_a, stance_b) {
                if sa != sb {
                    return Some(format!(
                        "same relation '{}' asserted with opposing stances",
                        a.relation
                    ));
                }
            }
        }

        None
    }

    /// Edge ids under a pending review; consumed by the IEF scorer.
    pub fn get_pending_nuance_edge_ids(&self) -> HashSet<String> {
        let Ok(reviews) = self.reviews.lock() else {
            return HashSet::new();
        };
        reviews
            .iter()
            .filter(|r| r.status == ReviewStatus::Pending)
            .flat_map(|r| [r.edge_a_id.clone(), r.edge_b_id.clone()])
            .collect()
    }

    /// Snapshot of every review in the registry.
    pub fn list_reviews(&self) -> Vec<NuanceReview> {
        self.reviews
            .lock()
            .map(|reviews| reviews.clone())
            .unwrap_or_default()
    }

    /// Settle a pending review.
    ///
    /// `Resolved` lifts the penalty with no edge mutation. `Supersede`
    /// stamps the losing edge's `properties.superseded_by` with the
    /// survivor's id.
    pub fn resolve(
        &self,
        review_id: &str,
        resolution: Resolution,
        storage: &Storage,
    ) -> Result<NuanceReview> {
        let mut reviews = self
            .reviews
            .lock()
            .map_err(|_| EngramError::Internal("review registry lock poisoned".into()))?;

        let review = reviews
            .iter_mut()
            .find(|r| r.id == review_id)
            .ok_or_else(|| EngramError::NotFound(format!("review {} does not exist", review_id)))?;

        if review.status != ReviewStatus::Pending {
            return Err(EngramError::Validation(format!(
                "review {} is already settled",
                review_id
            )));
        }

        match resolution {
            Resolution::Resolved => {
                review.status = ReviewStatus::Resolved;
            }
            Resolution::Supersede { surviving_edge_id } => {
                let retired_id = if surviving_edge_id == review.edge_a_id {
                    review.edge_b_id.clone()
                } else if surviving_edge_id == review.edge_b_id {
                    review.edge_a_id.clone()
                } else {
                    return Err(EngramError::field(
                        "surviving_edge_id",
                        "must be one of the review's edge pair",
                    ));
                };

                storage.set_edge_property(
                    &retired_id,
                    PROP_SUPERSEDED_BY,
                    serde_json::json!(surviving_edge_id),
                )?;
                review.status = ReviewStatus::Superseded;
            }
        }

        Ok(review.clone())
    }
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
