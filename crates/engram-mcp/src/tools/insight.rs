//! compress_to_l2_insight / get_insight_by_id tools.
//!
//! Compression embeds the content through the provider (with bounded
//! retry) and inserts one L2 row atomically with the vector. Lookup is a
//! graceful null: a missing id yields `{insight: null, status: "not_found"}`
//! rather than an error, so write-then-verify flows need no error handling.

use serde::Deserialize;

use engram_core::{EngramError, InsightInput};

use super::{parse_args, ToolContext};

pub fn compress_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "The compressed semantic statement"
            },
            "source_ids": {
                "type": "array",
                "items": {"type": "integer"},
                "description": "Ordered L0 entry ids this insight derives from; pass [] for a synthesised insight"
            },
            "metadata": {
                "type": "object",
                "description": "Free-form metadata stored with the insight"
            }
        },
        "required": ["content", "source_ids"]
    })
}

pub async fn execute_compress(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: InsightInput = parse_args(args)?;
    input.validate()?;

    let embedding = ctx.embedder.embed(&input.content).await?;
    let insight = ctx.storage.insert_insight(&input, &embedding)?;

    Ok(serde_json::json!({
        "id": insight.id,
        "embedding_status": "generated",
        "created_at": insight.created_at.to_rfc3339(),
        "status": "success",
    }))
}

pub fn get_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {
                "type": "string",
                "description": "Insight id to fetch"
            }
        },
        "required": ["id"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetInput {
    id: String,
}

pub async fn execute_get(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: GetInput = parse_args(args)?;

    match ctx.storage.get_insight(&input.id)? {
        Some(insight) => Ok(serde_json::json!({
            "id": insight.id,
            "content": insight.content,
            "source_ids": insight.source_ids,
            "metadata": insight.metadata,
            "created_at": insight.created_at.to_rfc3339(),
            "status": "success",
        })),
        None => Ok(serde_json::json!({
            "insight": null,
            "status": "not_found",
        })),
    }
}
