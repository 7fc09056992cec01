//! Memory Resources
//!
//! `memory://` URI scheme: read-only views over L0, L2, working memory,
//! the stale archive, and episode memory. Empty result sets are a
//! successful empty sequence, never an error.

use chrono::{DateTime, NaiveDate, Utc};

use engram_core::EngramError;

use super::ResourceError;
use crate::tools::ToolContext;

/// Read a memory:// resource.
pub async fn read(ctx: &ToolContext, uri: &str) -> Result<String, ResourceError> {
    let path = uri.strip_prefix("memory://").unwrap_or("");

    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };

    match path {
        "l2-insights" => read_insights(ctx, query).await,
        "working-memory" => read_working(ctx).await,
        "episode-memory" => read_episodes(ctx, query).await,
        "l0-raw" => read_raw(ctx, query).await,
        "stale-memory" => read_stale(ctx, query).await,
        other => Err(ResourceError::NotFound(format!("memory://{}", other))),
    }
}

// ============================================================================
// PARAMETER PARSING
// ============================================================================

fn param<'q>(query: Option<&'q str>, key: &str) -> Option<&'q str> {
    query.and_then(|q| {
        q.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then_some(v)
        })
    })
}

fn parse_param<T: std::str::FromStr>(
    query: Option<&str>,
    key: &str,
    default: T,
) -> Result<T, ResourceError> {
    match param(query, key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ResourceError::BadRequest(format!("{}={}", key, raw))),
        None => Ok(default),
    }
}

/// Parse `YYYY-MM-DD:YYYY-MM-DD` into an inclusive day range.
fn parse_date_range(
    raw: &str,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ResourceError> {
    let (from_raw, to_raw) = raw
        .split_once(':')
        .ok_or_else(|| ResourceError::BadRequest(format!("date_range={}", raw)))?;

    let parse_day = |s: &str| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| ResourceError::BadRequest(format!("date_range={}", raw)))
    };

    let from = parse_day(from_raw)?
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ResourceError::BadRequest(format!("date_range={}", raw)))?
        .and_utc();
    let to = parse_day(to_raw)?
        .and_hms_opt(23, 59, 59)
        .ok_or_else(|| ResourceError::BadRequest(format!("date_range={}", raw)))?
        .and_utc();

    if to < from {
        return Err(ResourceError::BadRequest(format!("date_range={}", raw)));
    }
    Ok((from, to))
}

fn pretty(value: &serde_json::Value) -> Result<String, ResourceError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ResourceError::Internal(EngramError::Internal(e.to_string())))
}

// ============================================================================
// VIEWS
// ============================================================================

async fn read_insights(ctx: &ToolContext, query: Option<&str>) -> Result<String, ResourceError> {
    let top_k: usize = parse_param(query, "top_k", 10)?;
    let top_k = top_k.clamp(1, 100);

    match param(query, "query") {
        Some(text) if !text.is_empty() => {
            let decoded = text.replace('+', " ");
            let result = ctx
                .retrieval
                .hybrid_search(&decoded, Some(top_k), None, None)
                .await?;

            let items: Vec<serde_json::Value> = result
                .results
                .iter()
                .map(|hit| {
                    serde_json::json!({
                        "id": hit.id,
                        "content": hit.content,
                        "score": hit.score,
                        "sourceIds": hit.source_ids,
                    })
                })
                .collect();

            pretty(&serde_json::json!({
                "total": items.len(),
                "queryType": result.query_type.as_str(),
                "items": items,
            }))
        }
        _ => {
            // No query: expose the most recent insights
            let items: Vec<serde_json::Value> = ctx
                .storage
                .list_recent_insights(top_k)?
                .iter()
                .map(|insight| {
                    serde_json::json!({
                        "id": insight.id,
                        "content": insight.content,
                        "sourceIds": insight.source_ids,
                        "createdAt": insight.created_at.to_rfc3339(),
                    })
                })
                .collect();
            pretty(&serde_json::json!({
                "total": items.len(),
                "items": items,
            }))
        }
    }
}

async fn read_working(ctx: &ToolContext) -> Result<String, ResourceError> {
    let items = ctx.storage.list_working()?;

    let rendered: Vec<serde_json::Value> = items
        .iter()
        .map(|item| {
            serde_json::json!({
                "id": item.id,
                "content": item.content,
                "importance": item.importance,
                "lastAccessed": item.last_accessed.to_rfc3339(),
                "createdAt": item.created_at.to_rfc3339(),
            })
        })
        .collect();

    pretty(&serde_json::json!({
        "total": rendered.len(),
        "capacity": ctx.storage.config().working_memory.capacity,
        "items": rendered,
    }))
}

async fn read_episodes(ctx: &ToolContext, query: Option<&str>) -> Result<String, ResourceError> {
    let limit: usize = parse_param(query, "limit", 20)?;
    let limit = limit.clamp(1, 100);
    let min_similarity: f32 = parse_param(query, "min_similarity", 0.5f32)?;
    if !(0.0..=1.0).contains(&min_similarity) {
        return Err(ResourceError::BadRequest(format!(
            "min_similarity={}",
            min_similarity
        )));
    }

    let items: Vec<serde_json::Value> = match param(query, "query") {
        Some(text) if !text.is_empty() => {
            let decoded = text.replace('+', " ");
            let embedding = ctx.embedder.embed_query(&decoded).await?;
            ctx.storage
                .episode_search(&embedding.vector, min_similarity, limit)?
                .into_iter()
                .map(|(episode, similarity)| {
                    serde_json::json!({
                        "id": episode.id,
                        "query": episode.query,
                        "reward": episode.reward,
                        "reflection": episode.reflection,
                        "similarity": similarity,
                        "createdAt": episode.created_at.to_rfc3339(),
                    })
                })
                .collect()
        }
        _ => ctx
            .storage
            .list_episodes(limit)?
            .iter()
            .map(|episode| {
                serde_json::json!({
                    "id": episode.id,
                    "query": episode.query,
                    "reward": episode.reward,
                    "reflection": episode.reflection,
                    "createdAt": episode.created_at.to_rfc3339(),
                })
            })
            .collect(),
    };

    pretty(&serde_json::json!({
        "total": items.len(),
        "items": items,
    }))
}

async fn read_raw(ctx: &ToolContext, query: Option<&str>) -> Result<String, ResourceError> {
    let limit: usize = parse_param(query, "limit", 50)?;
    let limit = limit.clamp(1, 500);
    let session_id = param(query, "session_id");

    let (from, to) = match param(query, "date_range") {
        Some(raw) => {
            let (from, to) = parse_date_range(raw)?;
            (Some(from), Some(to))
        }
        None => (None, None),
    };

    let entries = ctx.storage.list_raw(session_id, from, to, limit)?;

    let items: Vec<serde_json::Value> = entries
        .iter()
        .map(|entry| {
            serde_json::json!({
                "id": entry.id,
                "sessionId": entry.session_id,
                "speaker": entry.speaker,
                "content": entry.content,
                "timestamp": entry.timestamp.to_rfc3339(),
                "metadata": entry.metadata,
            })
        })
        .collect();

    pretty(&serde_json::json!({
        "total": items.len(),
        "items": items,
    }))
}

async fn read_stale(ctx: &ToolContext, query: Option<&str>) -> Result<String, ResourceError> {
    let importance_min: f64 = parse_param(query, "importance_min", 0.0)?;
    if !(0.0..=1.0).contains(&importance_min) {
        return Err(ResourceError::BadRequest(format!(
            "importance_min={}",
            importance_min
        )));
    }
    let limit: usize = parse_param(query, "limit", 50)?;

    let items: Vec<serde_json::Value> = ctx
        .storage
        .list_stale(importance_min, limit.clamp(1, 500))?
        .iter()
        .map(|item| {
            serde_json::json!({
                "id": item.id,
                "originalContent": item.original_content,
                "importance": item.importance,
                "archivedAt": item.archived_at.to_rfc3339(),
                "reason": item.reason.as_str(),
            })
        })
        .collect();

    pretty(&serde_json::json!({
        "total": items.len(),
        "items": items,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
