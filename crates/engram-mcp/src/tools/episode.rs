//! store_episode / list_episodes tools — reflection records for verbal
//! reinforcement. The query text is embedded so later episodes can be
//! recalled by similarity.

use serde::Deserialize;

use engram_core::{EngramError, EpisodeInput};

use super::{parse_args, ToolContext};

pub fn store_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "The query or task this reflection concerns"
            },
            "reward": {
                "type": "number",
                "minimum": -1.0,
                "maximum": 1.0,
                "description": "Reinforcement signal in [-1, 1]"
            },
            "reflection": {
                "type": "string",
                "description": "What was learned from the outcome"
            }
        },
        "required": ["query", "reward", "reflection"]
    })
}

pub async fn execute_store(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: EpisodeInput = parse_args(args)?;
    input.validate()?;

    let embedding = ctx.embedder.embed(&input.query).await?;
    let episode = ctx.storage.insert_episode(&input, &embedding)?;

    Ok(serde_json::json!({
        "id": episode.id,
        "created_at": episode.created_at.to_rfc3339(),
        "embedding_status": "generated",
        "status": "success",
    }))
}

pub fn list_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "limit": {
                "type": "integer",
                "minimum": 1,
                "maximum": 100,
                "default": 20,
                "description": "Maximum episodes to return, newest first"
            }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListInput {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

pub async fn execute_list(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: ListInput = parse_args(args)?;
    let episodes = ctx.storage.list_episodes(input.limit.clamp(1, 100))?;

    let items: Vec<serde_json::Value> = episodes
        .iter()
        .map(|e| {
            serde_json::json!({
                "id": e.id,
                "query": e.query,
                "reward": e.reward,
                "reflection": e.reflection,
                "created_at": e.created_at.to_rfc3339(),
            })
        })
        .collect();

    Ok(serde_json::json!(items))
}
