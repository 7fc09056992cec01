//! Dual-Judge Evaluation Pipeline
//!
//! Two independent relevance scorers grade (query, document) pairs in
//! parallel; per-document scores are persisted per judge and chance-
//! corrected agreement is reported as Cohen's κ.
//!
//! A single document's persistent provider failure degrades to a neutral
//! 0.5 for that judge rather than aborting the batch — partial success is
//! preferred for evaluation runs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::config::{RetryPolicy, TimeoutConfig};
use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::memory::ApiCostRecord;
use crate::providers::{estimate_tokens, retry_with_backoff, CostRecorder, ProviderError};

/// Neutral score recorded when a judge cannot grade one document.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Binarisation threshold for agreement: scores above are "relevant".
pub const RELEVANCE_THRESHOLD: f64 = 0.5;

// ============================================================================
// SCORER TRAIT
// ============================================================================

/// A capability that grades how relevant `document` is to `query`, in
/// [0, 1] with 0.0 = irrelevant, 0.5 = moderate, 1.0 = perfectly relevant.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Model identifier persisted with every grading run.
    fn model(&self) -> &str;

    async fn score(&self, query: &str, document: &str) -> Result<f64, ProviderError>;
}

// ============================================================================
// BASELINE SCORERS
// ============================================================================

/// Token-overlap (Jaccard) baseline. Deterministic and offline.
pub struct LexicalOverlapScorer;

fn tokenize(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

#[async_trait]
impl RelevanceScorer for LexicalOverlapScorer {
    fn model(&self) -> &str {
        "baseline/lexical-overlap"
    }

    async fn score(&self, query: &str, document: &str) -> Result<f64, ProviderError> {
        let q = tokenize(query);
        let d = tokenize(document);
        if q.is_empty() || d.is_empty() {
            return Ok(0.0);
        }
        let intersection = q.intersection(&d).count() as f64;
        let union = q.union(&d).count() as f64;
        Ok((intersection / union).clamp(0.0, 1.0))
    }
}

/// Embedding-cosine baseline: grades by rescaled cosine similarity of the
/// query and document vectors.
pub struct EmbeddingCosineScorer {
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingCosineScorer {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl RelevanceScorer for EmbeddingCosineScorer {
    fn model(&self) -> &str {
        "baseline/embedding-cosine"
    }

    async fn score(&self, query: &str, document: &str) -> Result<f64, ProviderError> {
        let q = self.provider.embed(query).await?;
        let d = self.provider.embed(document).await?;
        let c = cosine_similarity(&q, &d) as f64;
        Ok(((c + 1.0) / 2.0).clamp(0.0, 1.0))
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// A candidate document to grade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct JudgedDoc {
    pub id: String,
    pub content: String,
}

/// Outcome of one dual-judge run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualJudgeOutcome {
    pub judge1_scores: Vec<f64>,
    pub judge2_scores: Vec<f64>,
    pub judge1_model: String,
    pub judge2_model: String,
    /// None when κ is undefined (both judges unanimous on one class).
    pub kappa: Option<f64>,
}

/// Runs both scorers over a document batch.
#[derive(Clone)]
pub struct DualJudgePipeline {
    judge1: Arc<dyn RelevanceScorer>,
    judge2: Arc<dyn RelevanceScorer>,
    retry: RetryPolicy,
    call_timeout: std::time::Duration,
    costs: Option<Arc<dyn CostRecorder>>,
}

impl DualJudgePipeline {
    pub fn new(
        judge1: Arc<dyn RelevanceScorer>,
        judge2: Arc<dyn RelevanceScorer>,
        retry: RetryPolicy,
        timeouts: &TimeoutConfig,
        costs: Option<Arc<dyn CostRecorder>>,
    ) -> Self {
        Self {
            judge1,
            judge2,
            retry,
            call_timeout: std::time::Duration::from_millis(timeouts.provider_call_ms),
            costs,
        }
    }

    /// Grade every document with both judges in parallel.
    ///
    /// Per-document failures degrade to [`NEUTRAL_SCORE`] for the failing
    /// judge after retries are exhausted; the batch always completes.
    pub async fn score_docs(&self, query: &str, docs: &[JudgedDoc]) -> DualJudgeOutcome {
        let doc_futures = docs.iter().map(|doc| {
            let judge1 = Arc::clone(&self.judge1);
            let judge2 = Arc::clone(&self.judge2);
            async move {
                tokio::join!(
                    self.score_one(&*judge1, query, doc),
                    self.score_one(&*judge2, query, doc),
                )
            }
        });

        let pairs = join_all(doc_futures).await;

        let mut judge1_scores = Vec::with_capacity(docs.len());
        let mut judge2_scores = Vec::with_capacity(docs.len());
        for (s1, s2) in pairs {
            judge1_scores.push(s1);
            judge2_scores.push(s2);
        }

        let kappa = cohen_kappa(&judge1_scores, &judge2_scores);
        if kappa.is_none() && !docs.is_empty() {
            tracing::warn!(
                query_len = query.len(),
                docs = docs.len(),
                "Cohen's kappa undefined: both judges unanimous on one class"
            );
        }

        DualJudgeOutcome {
            judge1_scores,
            judge2_scores,
            judge1_model: self.judge1.model().to_string(),
            judge2_model: self.judge2.model().to_string(),
            kappa,
        }
    }

    async fn score_one(&self, judge: &dyn RelevanceScorer, query: &str, doc: &JudgedDoc) -> f64 {
        let timeout = self.call_timeout;
        let result = retry_with_backoff(&self.retry, "judge_score", || async {
            match tokio::time::timeout(timeout, judge.score(query, &doc.content)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "scoring exceeded {}ms",
                    timeout.as_millis()
                ))),
            }
        })
        .await;

        self.record_cost(judge.model(), query, &doc.content);

        match result {
            Ok(score) => score.clamp(0.0, 1.0),
            Err(e) => {
                tracing::warn!(
                    judge = judge.model(),
                    doc_id = %doc.id,
                    "judge failed after retries, recording neutral score: {}",
                    e
                );
                NEUTRAL_SCORE
            }
        }
    }

    fn record_cost(&self, model: &str, query: &str, document: &str) {
        if let Some(costs) = &self.costs {
            costs.record_cost(ApiCostRecord {
                timestamp: Utc::now(),
                provider: model.to_string(),
                operation: "score".to_string(),
                tokens: estimate_tokens(query) + estimate_tokens(document),
                estimated_cost: 0.0,
                query_id: None,
            });
        }
    }
}

// ============================================================================
// COHEN'S KAPPA
// ============================================================================

/// Chance-corrected agreement between two raters over the same documents.
///
/// Scores are binarised at [`RELEVANCE_THRESHOLD`]; κ ∈ [-1, 1], or None
/// when the expected agreement is 1 (both raters unanimous on one class),
/// where the statistic is undefined.
pub fn cohen_kappa(judge1: &[f64], judge2: &[f64]) -> Option<f64> {
    if judge1.is_empty() || judge1.len() != judge2.len() {
        return None;
    }

    let n = judge1.len() as f64;
    let bin = |s: f64| s > RELEVANCE_THRESHOLD;

    let mut agree = 0.0;
    let mut judge1_positive = 0.0;
    let mut judge2_positive = 0.0;
    for (&s1, &s2) in judge1.iter().zip(judge2.iter()) {
        let (b1, b2) = (bin(s1), bin(s2));
        if b1 == b2 {
            agree += 1.0;
        }
        if b1 {
            judge1_positive += 1.0;
        }
        if b2 {
            judge2_positive += 1.0;
        }
    }

    let observed = agree / n;
    let p1 = judge1_positive / n;
    let p2 = judge2_positive / n;
    let expected = p1 * p2 + (1.0 - p1) * (1.0 - p2);

    let denominator = 1.0 - expected;
    if denominator.abs() < f64::EPSILON {
        return None;
    }

    Some((observed - expected) / denominator)
}

// ============================================================================
// TESTS
// ============================================================================
