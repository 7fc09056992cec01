//! update_working_memory tool — transactional insert + capacity check +
//! LRU eviction with importance override and forced fallback.

use serde::Deserialize;

use engram_core::EngramError;

use super::{parse_args, ToolContext};

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "Context item to place in working memory"
            },
            "importance": {
                "type": "number",
                "minimum": 0.0,
                "maximum": 1.0,
                "default": 0.5,
                "description": "Eviction resistance; items above the critical threshold survive standard LRU"
            }
        },
        "required": ["content"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkingInput {
    content: String,
    #[serde(default = "default_importance")]
    importance: f64,
}

fn default_importance() -> f64 {
    0.5
}

pub async fn execute(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: WorkingInput = parse_args(args)?;

    let update = ctx
        .storage
        .update_working_memory(&input.content, input.importance)?;

    Ok(serde_json::json!({
        "added_id": update.added_id,
        "evicted_id": update.evicted_id,
        "archived_id": update.archived_id,
        "status": "success",
    }))
}
