//! store_raw_dialogue tool — append one turn to the L0 raw log.

use engram_core::{DialogueInput, EngramError};

use super::{parse_args, ToolContext};

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "session_id": {
                "type": "string",
                "description": "Opaque session identifier (string or UUID)"
            },
            "speaker": {
                "type": "string",
                "description": "Who produced this turn (e.g. 'user', 'assistant')"
            },
            "content": {
                "type": "string",
                "description": "Verbatim turn content"
            },
            "metadata": {
                "type": "object",
                "description": "Free-form metadata stored with the entry"
            }
        },
        "required": ["session_id", "speaker", "content"]
    })
}

pub async fn execute(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: DialogueInput = parse_args(args)?;
    let entry = ctx.storage.append_raw(&input)?;

    Ok(serde_json::json!({
        "id": entry.id,
        "session_id": entry.session_id,
        "timestamp": entry.timestamp.to_rfc3339(),
        "status": "success",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::test_context;

    #[tokio::test]
    async fn test_store_raw_dialogue() {
        let (ctx, _dir) = test_context();
        let args = serde_json::json!({
            "session_id": "s-1",
            "speaker": "user",
            "content": "we chose rusqlite",
        });

        let result = execute(&ctx, Some(args)).await.unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["session_id"], "s-1");
        assert!(result["id"].as_i64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_missing_field_is_validation() {
        let (ctx, _dir) = test_context();
        let args = serde_json::json!({"session_id": "s-1"});
        let err = execute(&ctx, Some(args)).await.unwrap_err();
        assert_eq!(err.kind(), "VALIDATION");
    }

    #[tokio::test]
    async fn test_roundtrip_via_list() {
        let (ctx, _dir) = test_context();
        let args = serde_json::json!({
            "session_id": "s-2",
            "speaker": "assistant",
            "content": "noted",
            "metadata": {"turn": 4},
        });
        execute(&ctx, Some(args)).await.unwrap();

        let rows = ctx.storage.list_raw(Some("s-2"), None, None, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metadata.get("turn").and_then(|v| v.as_i64()), Some(4));
    }
}
