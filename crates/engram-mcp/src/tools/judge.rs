//! store_dual_judge_scores tool — grade candidate documents with both
//! scorer providers in parallel and persist the per-judge score arrays
//! with Cohen's κ.

use serde::Deserialize;

use engram_core::{EngramError, JudgedDoc};

use super::{parse_args, ToolContext};

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query_id": {
                "type": "string",
                "description": "Ground-truth row id to store the scores under"
            },
            "query": {
                "type": "string",
                "description": "The query the candidates are graded against"
            },
            "docs": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "content": {"type": "string"}
                    },
                    "required": ["id", "content"]
                },
                "description": "Candidate documents to grade"
            }
        },
        "required": ["query_id", "query", "docs"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JudgeInput {
    query_id: String,
    query: String,
    docs: Vec<JudgedDoc>,
}

pub async fn execute(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: JudgeInput = parse_args(args)?;
    if input.query.trim().is_empty() {
        return Err(EngramError::field("query", "must not be empty"));
    }
    if input.docs.is_empty() {
        return Err(EngramError::field("docs", "must contain at least one document"));
    }

    let outcome = ctx.judges.score_docs(&input.query, &input.docs).await;

    let expected: Vec<String> = input.docs.iter().map(|d| d.id.clone()).collect();
    ctx.storage
        .insert_ground_truth(&input.query_id, &input.query, &expected, &outcome)?;

    Ok(serde_json::json!({
        "judge1_scores": outcome.judge1_scores,
        "judge2_scores": outcome.judge2_scores,
        // NaN is not representable in JSON; an undefined kappa crosses as null
        "kappa": outcome.kappa,
        "status": "success",
    }))
}
