//! hybrid_search tool — dense + lexical + graph retrieval fused with
//! weighted Reciprocal Rank Fusion.

use serde::Deserialize;

use engram_core::{EngramError, FusionWeights};

use super::{parse_args, ToolContext};

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query_text": {
                "type": "string",
                "description": "Natural-language search query"
            },
            "top_k": {
                "type": "integer",
                "minimum": 1,
                "maximum": 50,
                "default": 5,
                "description": "Number of fused results to return"
            },
            "weights": {
                "type": "object",
                "properties": {
                    "semantic": {"type": "number"},
                    "keyword": {"type": "number"},
                    "graph": {"type": "number"}
                },
                "description": "Override the configured fusion weights"
            },
            "query_embedding": {
                "type": "array",
                "items": {"type": "number"},
                "description": "Pre-computed query embedding; skips the provider"
            }
        },
        "required": ["query_text"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchInput {
    query_text: String,
    top_k: Option<usize>,
    weights: Option<FusionWeights>,
    query_embedding: Option<Vec<f32>>,
}

pub async fn execute(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: SearchInput = parse_args(args)?;

    let result = ctx
        .retrieval
        .hybrid_search(
            &input.query_text,
            input.top_k,
            input.weights,
            input.query_embedding,
        )
        .await?;

    let results: Vec<serde_json::Value> = result
        .results
        .iter()
        .map(|hit| {
            serde_json::json!({
                "id": hit.id,
                "content": hit.content,
                "score": hit.score,
                "source_ids": hit.source_ids,
            })
        })
        .collect();

    Ok(serde_json::json!({
        "results": results,
        "weights": {
            "semantic": result.weights.semantic,
            "keyword": result.weights.keyword,
            "graph": result.weights.graph,
        },
        "counts": {
            "semantic_results_count": result.counts.semantic_results_count,
            "keyword_results_count": result.counts.keyword_results_count,
            "graph_results_count": result.counts.graph_results_count,
        },
        "query_type": result.query_type.as_str(),
        "status": "success",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::test_context;
    use engram_core::{InsightInput, Metadata};

    async fn seed(ctx: &ToolContext, content: &str) {
        let vector = ctx.embedder.embed(content).await.unwrap();
        ctx.storage
            .insert_insight(
                &InsightInput {
                    content: content.into(),
                    source_ids: vec![],
                    metadata: Metadata::new(),
                },
                &vector,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_search_returns_shape() {
        let (ctx, _dir) = test_context();
        seed(&ctx, "the eviction policy protects critical items").await;

        let result = execute(
            &ctx,
            Some(serde_json::json!({"query_text": "eviction policy", "top_k": 5})),
        )
        .await
        .unwrap();

        assert_eq!(result["status"], "success");
        assert_eq!(result["query_type"], "standard");
        assert!(result["results"].as_array().unwrap().len() >= 1);
        assert!(result["counts"]["keyword_results_count"].as_u64().unwrap() >= 1);
        // Echoed weights match the standard profile
        assert!((result["weights"]["semantic"].as_f64().unwrap() - 0.7).abs() < 1e-9);
        assert!((result["weights"]["keyword"].as_f64().unwrap() - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_search_missing_query_rejected() {
        let (ctx, _dir) = test_context();
        let err = execute(&ctx, Some(serde_json::json!({}))).await.unwrap_err();
        assert_eq!(err.kind(), "VALIDATION");
    }

    #[tokio::test]
    async fn test_search_custom_weights_echoed() {
        let (ctx, _dir) = test_context();
        seed(&ctx, "anything at all").await;

        let result = execute(
            &ctx,
            Some(serde_json::json!({
                "query_text": "anything",
                "weights": {"semantic": 0.5, "keyword": 0.4, "graph": 0.1},
            })),
        )
        .await
        .unwrap();
        assert!((result["weights"]["keyword"].as_f64().unwrap() - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_search_empty_store_is_empty_success() {
        let (ctx, _dir) = test_context();
        let result = execute(
            &ctx,
            Some(serde_json::json!({"query_text": "nothing stored yet"})),
        )
        .await
        .unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["results"].as_array().unwrap().len(), 0);
    }
}
