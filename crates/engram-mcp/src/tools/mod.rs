//! MCP Tools
//!
//! One module per tool family. Every tool exposes `schema()` (JSON Schema
//! for its input) and `execute()` returning the structured result payload.
//! Errors surface as `{error, details, tool}` objects with the taxonomy
//! kind in `error`; no caller input is echoed back in error payloads.

pub mod dialogue;
pub mod episode;
pub mod graph;
pub mod insight;
pub mod judge;
pub mod ping;
pub mod search;
pub mod working;

use std::sync::Arc;

use serde::de::DeserializeOwned;

use engram_core::{
    DissonanceEngine, DualJudgePipeline, EmbeddingClient, EngramError, RetrievalEngine, Storage,
};

/// Shared state every tool executes against.
#[derive(Clone)]
pub struct ToolContext {
    pub storage: Arc<Storage>,
    pub retrieval: RetrievalEngine,
    pub judges: DualJudgePipeline,
    pub dissonance: Arc<DissonanceEngine>,
    pub embedder: EmbeddingClient,
}

/// Parse tool arguments into a typed input, mapping deserialization
/// failures to the VALIDATION kind.
pub fn parse_args<T: DeserializeOwned>(
    args: Option<serde_json::Value>,
) -> Result<T, EngramError> {
    let value = args.unwrap_or(serde_json::Value::Object(Default::default()));
    serde_json::from_value(value).map_err(|e| EngramError::Validation(e.to_string()))
}

/// Structured error payload for the protocol boundary.
pub fn error_payload(error: &EngramError, tool: &str) -> serde_json::Value {
    serde_json::json!({
        "error": error.kind(),
        "details": error.to_string(),
        "tool": tool,
    })
}
