//! Hybrid Retrieval Engine
//!
//! One query fans out to dense (HNSW over L2 embeddings), lexical
//! (FTS5/BM25 over L2 content), and — when the graph knows any entity the
//! query names — graph-anchored candidates. The lists are fused with
//! weighted Reciprocal Rank Fusion under a per-request deadline.
//!
//! Weight selection: relational queries (cue word or ≥2 known entities)
//! use the relational profile; otherwise graph-aware queries use the
//! graph profile and plain queries the standard semantic/keyword split.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::FusionWeights;
use crate::embeddings::EmbeddingClient;
use crate::error::{EngramError, Result};
use crate::search::{classify_query, weighted_rrf, QueryType, RankedList};
use crate::storage::Storage;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// One fused search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    /// Fused RRF score.
    pub score: f64,
    pub source_ids: Vec<i64>,
}

/// Per-searcher candidate counts, echoed with every result.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SearchCounts {
    pub semantic_results_count: usize,
    pub keyword_results_count: usize,
    pub graph_results_count: usize,
}

/// Complete hybrid search output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridSearchResult {
    pub results: Vec<SearchHit>,
    pub weights: FusionWeights,
    pub counts: SearchCounts,
    pub query_type: QueryType,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Orchestrates embedding, fan-out, and fusion.
#[derive(Clone)]
pub struct RetrievalEngine {
    storage: Arc<Storage>,
    embedder: EmbeddingClient,
}

impl RetrievalEngine {
    pub fn new(storage: Arc<Storage>, embedder: EmbeddingClient) -> Self {
        Self { storage, embedder }
    }

    /// Known graph entities the query mentions, lowercased comparison.
    fn matched_entities(&self, query: &str) -> Result<Vec<String>> {
        let lowered = query.to_lowercase();
        let names = self.storage.list_node_names()?;
        let mut matched: Vec<String> = names
            .into_iter()
            .filter(|name| name.len() >= 2 && lowered.contains(&name.to_lowercase()))
            .collect();
        matched.sort();
        matched.dedup();
        Ok(matched)
    }

    /// Run the full hybrid search pipeline.
    ///
    /// `weights` overrides the configured profile when given;
    /// `query_embedding` skips the embedding provider when the caller
    /// already holds a vector of the right dimension.
    pub async fn hybrid_search(
        &self,
        query_text: &str,
        top_k: Option<usize>,
        weights: Option<FusionWeights>,
        query_embedding: Option<Vec<f32>>,
    ) -> Result<HybridSearchResult> {
        if query_text.trim().is_empty() {
            return Err(EngramError::field("query_text", "must not be empty"));
        }

        let config = self.storage.config().retrieval.clone();
        let top_k = match top_k {
            Some(0) => {
                return Err(EngramError::field("top_k", "must be a positive integer"));
            }
            Some(k) => k,
            None => config.default_top_k,
        };
        let candidates = top_k * config.candidate_multiplier.max(1);

        let entities = self.matched_entities(query_text)?;
        let query_type = classify_query(query_text, &config, entities.len());

        let graph_active = config.graph_injection && !entities.is_empty();
        let weights = weights.unwrap_or(match query_type {
            QueryType::Relational if config.graph_injection => config.relational_weights,
            QueryType::Standard if graph_active => config.graph_weights,
            _ => config.weights,
        });

        // 1. Query embedding (provider with retry, or caller-supplied)
        let embedding = match query_embedding {
            Some(vector) => {
                if vector.len() != self.embedder.dimensions() {
                    return Err(EngramError::field(
                        "query_embedding",
                        "dimension does not match the configured embedding size",
                    ));
                }
                vector
            }
            None => self.embedder.embed_query(query_text).await?.vector,
        };

        // 2-5. Dense, lexical, and graph searches run concurrently under
        // the hybrid-search deadline.
        let deadline =
            std::time::Duration::from_millis(self.storage.config().timeouts.hybrid_search_ms);

        let dense_task = {
            let storage = Arc::clone(&self.storage);
            let embedding = embedding.clone();
            let min_similarity = config.min_semantic_similarity;
            tokio::task::spawn_blocking(move || {
                storage.dense_search(&embedding, candidates, min_similarity)
            })
        };
        let lexical_task = {
            let storage = Arc::clone(&self.storage);
            let query = query_text.to_string();
            tokio::task::spawn_blocking(move || storage.lexical_search(&query, candidates))
        };
        let graph_task = {
            let storage = Arc::clone(&self.storage);
            let entities = entities.clone();
            let active = graph_active && weights.graph > 0.0;
            tokio::task::spawn_blocking(move || {
                if active {
                    storage.graph_anchored_insights(&entities, 2, candidates)
                } else {
                    Ok(Vec::new())
                }
            })
        };

        let joined = tokio::time::timeout(deadline, async {
            tokio::try_join!(dense_task, lexical_task, graph_task)
        })
        .await
        .map_err(|_| {
            EngramError::Timeout(format!(
                "hybrid search exceeded {}ms",
                deadline.as_millis()
            ))
        })?
        .map_err(|e| EngramError::Internal(format!("search task failed: {}", e)))?;

        let (dense, lexical, graph) = (joined.0?, joined.1?, joined.2?);

        let counts = SearchCounts {
            semantic_results_count: dense.len(),
            keyword_results_count: lexical.len(),
            graph_results_count: graph.len(),
        };

        // 6-7. Weighted RRF, deterministic tie-breaks, truncate to top_k
        let lists = [
            RankedList {
                source: "semantic",
                weight: weights.semantic,
                docs: dense,
            },
            RankedList {
                source: "keyword",
                weight: weights.keyword,
                docs: lexical,
            },
            RankedList {
                source: "graph",
                weight: weights.graph,
                docs: graph,
            },
        ];
        let fused = weighted_rrf(&lists, config.rrf_k, top_k);

        let mut results = Vec::with_capacity(fused.len());
        for (id, score) in fused {
            if let Some(insight) = self.storage.get_insight(&id)? {
                results.push(SearchHit {
                    id: insight.id,
                    content: insight.content,
                    score,
                    source_ids: insight.source_ids,
                });
            }
        }

        Ok(HybridSearchResult {
            results,
            weights,
            counts,
            query_type,
        })
    }

    /// Embed a query for reuse by graph tools (IEF similarity input).
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        Ok(self.embedder.embed_query(query).await?.vector)
    }
}

// ============================================================================
// TESTS
// ============================================================================
