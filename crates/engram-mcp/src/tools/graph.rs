//! Knowledge graph tools — graph_add_node, graph_add_edge,
//! graph_query_neighbors, graph_find_path.
//!
//! Neighbour ranking defaults to the memory-strength relevance of the
//! reaching edge; `use_ief=true` re-ranks with the integrative evaluation
//! function, reading the dissonance engine's pending-review set for
//! penalties.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;

use engram_core::{calculate_ief_score, Direction, EngramError, Metadata};

use super::{parse_args, ToolContext};

// ============================================================================
// graph_add_node
// ============================================================================

pub fn add_node_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "label": {
                "type": "string",
                "description": "Node category (e.g. 'technology', 'person', 'problem')"
            },
            "name": {
                "type": "string",
                "description": "Entity name, unique per label"
            },
            "properties": {
                "type": "object",
                "description": "Free-form property map; provided keys overwrite existing ones"
            },
            "vector_id": {
                "type": "string",
                "description": "Insight id whose embedding anchors this node semantically"
            }
        },
        "required": ["label", "name"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddNodeInput {
    label: String,
    name: String,
    #[serde(default)]
    properties: Metadata,
    vector_id: Option<String>,
}

pub async fn execute_add_node(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: AddNodeInput = parse_args(args)?;

    let node = ctx.storage.upsert_node(
        &input.label,
        &input.name,
        &input.properties,
        input.vector_id.as_deref(),
    )?;

    Ok(serde_json::json!({
        "id": node.id,
        "status": "success",
    }))
}

// ============================================================================
// graph_add_edge
// ============================================================================

pub fn add_edge_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "source_name": {"type": "string"},
            "target_name": {"type": "string"},
            "relation": {
                "type": "string",
                "description": "Relation name (e.g. USES, SOLVES, CREATED_BY, RELATED_TO, DEPENDS_ON, constitutive)"
            },
            "source_label": {
                "type": "string",
                "description": "Label for an auto-created source node (default 'entity')"
            },
            "target_label": {
                "type": "string",
                "description": "Label for an auto-created target node (default 'entity')"
            },
            "weight": {
                "type": "number",
                "minimum": 0.0,
                "default": 1.0
            },
            "properties": {
                "type": "object",
                "description": "Edge property map (edge_type, stance, ...)"
            }
        },
        "required": ["source_name", "target_name", "relation"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddEdgeInput {
    source_name: String,
    target_name: String,
    relation: String,
    source_label: Option<String>,
    target_label: Option<String>,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default)]
    properties: Metadata,
}

fn default_weight() -> f64 {
    1.0
}

pub async fn execute_add_edge(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: AddEdgeInput = parse_args(args)?;

    let edge_id = ctx.storage.add_edge(
        &input.source_name,
        &input.target_name,
        &input.relation,
        input.source_label.as_deref(),
        input.target_label.as_deref(),
        input.weight,
        &input.properties,
    )?;

    Ok(serde_json::json!({
        "edge_id": edge_id,
        "status": "success",
    }))
}

// ============================================================================
// graph_query_neighbors
// ============================================================================

pub fn query_neighbors_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "node_name": {"type": "string"},
            "relation_type": {
                "type": "string",
                "description": "Only follow edges with this relation"
            },
            "depth": {
                "type": "integer",
                "minimum": 1,
                "maximum": 5,
                "default": 1
            },
            "direction": {
                "type": "string",
                "enum": ["outgoing", "incoming", "both"],
                "default": "both"
            },
            "include_superseded": {
                "type": "boolean",
                "default": false,
                "description": "Also return edges retired by a nuance resolution"
            },
            "use_ief": {
                "type": "boolean",
                "default": false,
                "description": "Re-rank neighbours with the integrative evaluation function"
            },
            "query_embedding": {
                "type": "array",
                "items": {"type": "number"},
                "description": "Query vector for the IEF similarity component"
            }
        },
        "required": ["node_name"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NeighborsInput {
    node_name: String,
    relation_type: Option<String>,
    #[serde(default = "default_depth")]
    depth: u32,
    #[serde(default)]
    direction: String,
    #[serde(default)]
    include_superseded: bool,
    #[serde(default)]
    use_ief: bool,
    query_embedding: Option<Vec<f32>>,
}

fn default_depth() -> u32 {
    1
}

pub async fn execute_query_neighbors(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: NeighborsInput = parse_args(args)?;

    let direction = if input.direction.is_empty() {
        Direction::Both
    } else {
        Direction::parse_name(&input.direction)
            .ok_or_else(|| EngramError::field("direction", "must be outgoing, incoming, or both"))?
    };

    let deadline = Duration::from_millis(ctx.storage.config().timeouts.graph_traversal_ms);
    let started = Instant::now();

    let mut neighbors = {
        let storage = std::sync::Arc::clone(&ctx.storage);
        let node_name = input.node_name.clone();
        let relation = input.relation_type.clone();
        let include_superseded = input.include_superseded;
        let depth = input.depth;
        tokio::time::timeout(
            deadline,
            tokio::task::spawn_blocking(move || {
                storage.query_neighbors(
                    &node_name,
                    relation.as_deref(),
                    depth,
                    direction,
                    include_superseded,
                )
            }),
        )
        .await
        .map_err(|_| {
            EngramError::Timeout(format!(
                "graph traversal exceeded {}ms",
                deadline.as_millis()
            ))
        })?
        .map_err(|e| EngramError::Internal(format!("traversal task failed: {}", e)))??
    };

    if input.use_ief {
        let pending = ctx.dissonance.get_pending_nuance_edge_ids();
        let now = Utc::now();
        let ief_config = &ctx.storage.config().ief;

        for neighbor in &mut neighbors {
            let Some(edge) = ctx.storage.get_edge(&neighbor.edge_id)? else {
                continue;
            };
            let edge_data = ctx.storage.ief_edge_data(&edge)?;
            let score = calculate_ief_score(
                &edge_data,
                input.query_embedding.as_deref(),
                Some(&pending),
                now,
                ief_config,
            );
            neighbor.ief_score = Some(score.ief_score);
            neighbor.ief_components = Some(score.components);
        }

        neighbors.sort_by(|a, b| {
            b.ief_score
                .partial_cmp(&a.ief_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
    }

    tracing::debug!(
        node = %input.node_name,
        count = neighbors.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "graph traversal complete"
    );

    Ok(serde_json::json!({
        "neighbors": neighbors,
        "status": "success",
    }))
}

// ============================================================================
// graph_find_path
// ============================================================================

pub fn find_path_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "start_node": {"type": "string"},
            "end_node": {"type": "string"},
            "max_depth": {
                "type": "integer",
                "minimum": 1,
                "maximum": 5,
                "default": 5
            },
            "use_ief": {
                "type": "boolean",
                "default": false,
                "description": "Score the best path with the integrative evaluation function"
            },
            "query_embedding": {
                "type": "array",
                "items": {"type": "number"}
            }
        },
        "required": ["start_node", "end_node"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FindPathInput {
    start_node: String,
    end_node: String,
    #[serde(default = "default_max_depth")]
    max_depth: u32,
    #[serde(default)]
    use_ief: bool,
    query_embedding: Option<Vec<f32>>,
}

fn default_max_depth() -> u32 {
    5
}

pub async fn execute_find_path(
    ctx: &ToolContext,
    args: Option<serde_json::Value>,
) -> Result<serde_json::Value, EngramError> {
    let input: FindPathInput = parse_args(args)?;

    let budget = Duration::from_millis(ctx.storage.config().timeouts.graph_path_ms);
    let deadline = Instant::now() + budget;

    let mut result = {
        let storage = std::sync::Arc::clone(&ctx.storage);
        let start = input.start_node.clone();
        let end = input.end_node.clone();
        let max_depth = input.max_depth;
        tokio::time::timeout(
            budget,
            tokio::task::spawn_blocking(move || {
                storage.find_path(&start, &end, max_depth, deadline)
            }),
        )
        .await
        .map_err(|_| {
            EngramError::Timeout(format!("path search exceeded {}ms", budget.as_millis()))
        })?
        .map_err(|e| EngramError::Internal(format!("path task failed: {}", e)))??
    };

    // Mean IEF over the best path's edges
    if input.use_ief && result.path_found {
        if let Some(best) = result.paths.first() {
            let pending = ctx.dissonance.get_pending_nuance_edge_ids();
            let now = Utc::now();
            let ief_config = &ctx.storage.config().ief;

            let mut total = 0.0;
            let mut edges = 0usize;
            for step in best {
                let Some(edge_id) = &step.edge_id else { continue };
                let Some(edge) = ctx.storage.get_edge(edge_id)? else {
                    continue;
                };
                let edge_data = ctx.storage.ief_edge_data(&edge)?;
                let score = calculate_ief_score(
                    &edge_data,
                    input.query_embedding.as_deref(),
                    Some(&pending),
                    now,
                    ief_config,
                );
                total += score.ief_score;
                edges += 1;
            }
            if edges > 0 {
                result.path_ief_score = Some(total / edges as f64);
            }
        }
    }

    let best_path = result.paths.first().cloned().unwrap_or_default();

    Ok(serde_json::json!({
        "path_found": result.path_found,
        "path_length": result.path_length,
        "path": best_path,
        "paths": result.paths,
        "path_ief_score": result.path_ief_score,
        "status": "success",
    }))
}

// ============================================================================
// TESTS
// ============================================================================
