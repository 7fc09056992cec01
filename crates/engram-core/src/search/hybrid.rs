//! Weighted Reciprocal Rank Fusion
//!
//! Merges the dense, lexical, and graph candidate lists into one ranking:
//! `score(d) = Σᵢ wᵢ / (k + rankᵢ(d))` with 1-based ranks. RRF normalizes
//! across incomparable score scales and rewards documents surfaced by
//! several searchers; the constant k (typically 60) dampens the dominance
//! of top ranks.
//!
//! The fused ordering is deterministic: ties on fused score break by
//! higher dense score, then by lower id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;

// ============================================================================
// TYPES
// ============================================================================

/// One candidate from a single searcher, with that searcher's native score.
pub type ScoredDoc = (String, f64);

/// A weighted, ranked candidate list entering fusion.
#[derive(Debug, Clone)]
pub struct RankedList {
    /// Searcher label ("semantic", "keyword", "graph"); used in counts.
    pub source: &'static str,
    pub weight: f64,
    /// Candidates in rank order (best first).
    pub docs: Vec<ScoredDoc>,
}

/// Query classification steering the weight profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    #[default]
    Standard,
    Relational,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Standard => "standard",
            QueryType::Relational => "relational",
        }
    }
}

// ============================================================================
// FUSION
// ============================================================================

/// Fuse ranked lists with weighted RRF; returns (id, fused_score) best
/// first, truncated to `top_k`.
pub fn weighted_rrf(lists: &[RankedList], k: f64, top_k: usize) -> Vec<ScoredDoc> {
    let mut fused: HashMap<String, f64> = HashMap::new();
    // Dense score is the first tie-break; remember it per doc.
    let mut dense_scores: HashMap<String, f64> = HashMap::new();

    for list in lists {
        for (rank, (id, score)) in list.docs.iter().enumerate() {
            let contribution = list.weight / (k + (rank + 1) as f64);
            *fused.entry(id.clone()).or_default() += contribution;
            if list.source == "semantic" {
                dense_scores.insert(id.clone(), *score);
            }
        }
    }

    let mut results: Vec<ScoredDoc> = fused.into_iter().collect();
    results.sort_by(|(id_a, score_a), (id_b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let dense_a = dense_scores.get(id_a).copied().unwrap_or(f64::MIN);
                let dense_b = dense_scores.get(id_b).copied().unwrap_or(f64::MIN);
                dense_b
                    .partial_cmp(&dense_a)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| id_a.cmp(id_b))
    });

    results.truncate(top_k);
    results
}

// ============================================================================
// QUERY CLASSIFICATION
// ============================================================================

/// Classify a query as relational when it carries a configured cue word
/// (any locale list) or names at least two known graph entities.
pub fn classify_query(
    query: &str,
    config: &RetrievalConfig,
    matched_entity_count: usize,
) -> QueryType {
    if matched_entity_count >= 2 {
        return QueryType::Relational;
    }

    let lowered = query.to_lowercase();
    let has_cue = config
        .relational_keywords_en
        .iter()
        .chain(config.relational_keywords_de.iter())
        .any(|kw| lowered.contains(kw.as_str()));

    if has_cue {
        QueryType::Relational
    } else {
        QueryType::Standard
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(ids: &[&str]) -> Vec<ScoredDoc> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), 1.0 - i as f64 * 0.1))
            .collect()
    }

    #[test]
    fn test_rrf_rewards_multi_list_docs() {
        // dense = [A,B,C,D,E] w=0.7, lexical = [C,F,A,G,H] w=0.3, k=60
        let lists = [
            RankedList {
                source: "semantic",
                weight: 0.7,
                docs: docs(&["A", "B", "C", "D", "E"]),
            },
            RankedList {
                source: "keyword",
                weight: 0.3,
                docs: docs(&["C", "F", "A", "G", "H"]),
            },
        ];

        let fused = weighted_rrf(&lists, 60.0, 5);
        let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();

        // A and C appear in both lists and outrank the single-list docs
        assert_eq!(order[0], "A");
        assert_eq!(order[1], "C");
        let pos =
            |id: &str| order.iter().position(|x| *x == id).unwrap_or(usize::MAX);
        for single in ["B", "D", "E", "F"] {
            assert!(pos("A") < pos(single));
            assert!(pos("C") < pos(single));
        }
    }

    #[test]
    fn test_rrf_is_deterministic() {
        let lists = [
            RankedList {
                source: "semantic",
                weight: 0.7,
                docs: docs(&["X", "Y", "Z"]),
            },
            RankedList {
                source: "keyword",
                weight: 0.3,
                docs: docs(&["Z", "X", "W"]),
            },
        ];

        let first = weighted_rrf(&lists, 60.0, 4);
        let second = weighted_rrf(&lists, 60.0, 4);
        assert_eq!(first, second);
    }

    #[test]
    fn test_rrf_tie_breaks_by_lower_id() {
        // Identical single-list ranks → identical fused scores
        let lists = [
            RankedList {
                source: "semantic",
                weight: 0.5,
                docs: vec![("b".to_string(), 0.9)],
            },
            RankedList {
                source: "keyword",
                weight: 0.5,
                docs: vec![("a".to_string(), 0.9)],
            },
        ];

        let fused = weighted_rrf(&lists, 60.0, 2);
        assert_eq!(fused[0].0, "a");
        assert_eq!(fused[1].0, "b");
    }

    #[test]
    fn test_rrf_tie_breaks_by_dense_score_first() {
        let lists = [
            RankedList {
                source: "semantic",
                weight: 0.5,
                docs: vec![("z".to_string(), 0.95)],
            },
            RankedList {
                source: "graph",
                weight: 0.5,
                docs: vec![("a".to_string(), 0.95)],
            },
        ];

        // Same fused score, but z has a dense score and a does not
        let fused = weighted_rrf(&lists, 60.0, 2);
        assert_eq!(fused[0].0, "z");
    }

    #[test]
    fn test_rrf_empty_lists() {
        let lists = [
            RankedList {
                source: "semantic",
                weight: 0.7,
                docs: vec![],
            },
            RankedList {
                source: "keyword",
                weight: 0.3,
                docs: docs(&["only"]),
            },
        ];
        let fused = weighted_rrf(&lists, 60.0, 5);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].0, "only");
    }

    #[test]
    fn test_rrf_truncates_to_top_k() {
        let lists = [RankedList {
            source: "semantic",
            weight: 1.0,
            docs: docs(&["a", "b", "c", "d", "e", "f"]),
        }];
        assert_eq!(weighted_rrf(&lists, 60.0, 3).len(), 3);
    }

    #[test]
    fn test_classify_standard_query() {
        let config = RetrievalConfig::default();
        assert_eq!(
            classify_query("what did we decide about caching", &config, 0),
            QueryType::Standard
        );
    }

    #[test]
    fn test_classify_relational_cue_english() {
        let config = RetrievalConfig::default();
        assert_eq!(
            classify_query("how is the scheduler related to the pool", &config, 0),
            QueryType::Relational
        );
    }

    #[test]
    fn test_classify_relational_cue_german() {
        let config = RetrievalConfig::default();
        assert_eq!(
            classify_query("welcher zusammenhang besteht hier", &config, 0),
            QueryType::Relational
        );
    }

    #[test]
    fn test_classify_relational_by_entities() {
        let config = RetrievalConfig::default();
        assert_eq!(
            classify_query("tokio and rusqlite", &config, 2),
            QueryType::Relational
        );
    }
}
