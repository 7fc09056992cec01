//! MCP Server Core
//!
//! Routes JSON-RPC requests to tool and resource handlers. Every tool
//! call runs under the configured per-request deadline; errors cross the
//! boundary as structured `{error, details, tool}` payloads flagged with
//! `isError`.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListResourcesResult,
    ListToolsResult, ReadResourceRequest, ReadResourceResult, ResourceContent,
    ResourceDescription, ServerCapabilities, ServerInfo, ToolDescription, ToolResultContent,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};
use crate::resources::{self, ResourceError};
use crate::tools::{self, error_payload, ToolContext};

use engram_core::EngramError;

/// MCP server implementation.
pub struct McpServer {
    ctx: ToolContext,
    initialized: bool,
}

impl McpServer {
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            ctx,
            initialized: false,
        }
    }

    /// Handle an incoming JSON-RPC request. Notifications return None.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("Handling request: {}", request.method);

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!(
                "Rejecting request '{}': server not initialized",
                request.method
            );
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "resources/list" => self.handle_resources_list(),
            "resources/read" => self.handle_resources_read(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            method => {
                warn!("Unknown method: {}", method);
                Err(JsonRpcError::method_not_found(&format!(
                    "Unknown method: {}",
                    method
                )))
            }
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    /// Handle initialize; negotiates down to an older client version.
    fn handle_initialize(
        &mut self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        let negotiated_version = if request.protocol_version.as_str() < MCP_VERSION {
            info!(
                "Client requested older protocol version {}, using it",
                request.protocol_version
            );
            request.protocol_version.clone()
        } else {
            MCP_VERSION.to_string()
        };

        self.initialized = true;
        info!(
            "MCP session initialized with protocol version {}",
            negotiated_version
        );

        let result = InitializeResult {
            protocol_version: negotiated_version,
            server_info: ServerInfo {
                name: "engram".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some({
                    let mut map = HashMap::new();
                    map.insert("listChanged".to_string(), serde_json::json!(false));
                    map
                }),
                resources: Some({
                    let mut map = HashMap::new();
                    map.insert("listChanged".to_string(), serde_json::json!(false));
                    map
                }),
                prompts: None,
            },
            instructions: Some(
                "Engram is a tiered cognitive memory service. Append raw dialogue with \
                 store_raw_dialogue, distil durable knowledge with compress_to_l2_insight, \
                 and keep the active context in update_working_memory (bounded; low-importance \
                 items are evicted to the stale archive). Retrieve with hybrid_search; use the \
                 graph_* tools to maintain and traverse the knowledge graph."
                    .to_string(),
            ),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    /// Handle tools/list.
    fn handle_tools_list(&self) -> Result<serde_json::Value, JsonRpcError> {
        let tools = vec![
            ToolDescription {
                name: "ping".to_string(),
                description: Some("Liveness probe. Returns pong with a timestamp.".to_string()),
                input_schema: tools::ping::schema(),
            },
            ToolDescription {
                name: "store_raw_dialogue".to_string(),
                description: Some(
                    "Append one conversational turn to the immutable L0 raw log. No embedding \
                     is computed; raw entries are the provenance layer for later compression."
                        .to_string(),
                ),
                input_schema: tools::dialogue::schema(),
            },
            ToolDescription {
                name: "compress_to_l2_insight".to_string(),
                description: Some(
                    "Store a compressed semantic insight with its embedding and L0 provenance \
                     (source_ids; pass [] for a synthesised insight)."
                        .to_string(),
                ),
                input_schema: tools::insight::compress_schema(),
            },
            ToolDescription {
                name: "store_episode".to_string(),
                description: Some(
                    "Store a reflection episode (query, reward in [-1,1], reflection) for \
                     verbal reinforcement. The query is embedded for similarity recall."
                        .to_string(),
                ),
                input_schema: tools::episode::store_schema(),
            },
            ToolDescription {
                name: "store_dual_judge_scores".to_string(),
                description: Some(
                    "Grade candidate documents against a query with both judges in parallel; \
                     persists per-judge score arrays and Cohen's kappa agreement."
                        .to_string(),
                ),
                input_schema: tools::judge::schema(),
            },
            ToolDescription {
                name: "hybrid_search".to_string(),
                description: Some(
                    "Hybrid retrieval over L2: dense + lexical + graph-anchored evidence fused \
                     with weighted Reciprocal Rank Fusion. Relational queries shift weight to \
                     the graph."
                        .to_string(),
                ),
                input_schema: tools::search::schema(),
            },
            ToolDescription {
                name: "update_working_memory".to_string(),
                description: Some(
                    "Insert into the bounded working set. Past capacity, the least recently \
                     used non-critical item is archived to stale memory and removed; when all \
                     items are critical the oldest is evicted regardless."
                        .to_string(),
                ),
                input_schema: tools::working::schema(),
            },
            ToolDescription {
                name: "get_insight_by_id".to_string(),
                description: Some(
                    "Fetch one insight. A missing id returns {insight: null, status: \
                     'not_found'} rather than an error."
                        .to_string(),
                ),
                input_schema: tools::insight::get_schema(),
            },
            ToolDescription {
                name: "list_episodes".to_string(),
                description: Some("List recent reflection episodes, newest first.".to_string()),
                input_schema: tools::episode::list_schema(),
            },
            ToolDescription {
                name: "graph_add_node".to_string(),
                description: Some(
                    "Upsert a typed named entity, keyed on (label, name). vector_id links the \
                     node to an insight as its semantic anchor."
                        .to_string(),
                ),
                input_schema: tools::graph::add_node_schema(),
            },
            ToolDescription {
                name: "graph_add_edge".to_string(),
                description: Some(
                    "Upsert a typed directed relation; missing endpoints are auto-created. \
                     Idempotent on (source, target, relation)."
                        .to_string(),
                ),
                input_schema: tools::graph::add_edge_schema(),
            },
            ToolDescription {
                name: "graph_query_neighbors".to_string(),
                description: Some(
                    "Bounded traversal (depth 1-5) returning neighbours ranked by edge \
                     relevance, or by the integrative evaluation function with use_ief=true."
                        .to_string(),
                ),
                input_schema: tools::graph::query_neighbors_schema(),
            },
            ToolDescription {
                name: "graph_find_path".to_string(),
                description: Some(
                    "BFS shortest-path discovery between two named nodes (up to 10 tied \
                     paths), with an optional IEF score over the best path."
                        .to_string(),
                ),
                input_schema: tools::graph::find_path_schema(),
            },
        ];

        let result = ListToolsResult { tools };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    /// Handle tools/call under the per-request deadline.
    async fn handle_tools_call(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("Missing tool call parameters")),
        };

        let deadline = Duration::from_millis(self.ctx.storage.config().timeouts.request_ms);
        let ctx = &self.ctx;
        let args = request.arguments;

        let dispatched = tokio::time::timeout(deadline, async {
            match request.name.as_str() {
                "ping" => Ok(tools::ping::execute().await),
                "store_raw_dialogue" => tools::dialogue::execute(ctx, args).await,
                "compress_to_l2_insight" => tools::insight::execute_compress(ctx, args).await,
                "store_episode" => tools::episode::execute_store(ctx, args).await,
                "store_dual_judge_scores" => tools::judge::execute(ctx, args).await,
                "hybrid_search" => tools::search::execute(ctx, args).await,
                "update_working_memory" => tools::working::execute(ctx, args).await,
                "get_insight_by_id" => tools::insight::execute_get(ctx, args).await,
                "list_episodes" => tools::episode::execute_list(ctx, args).await,
                "graph_add_node" => tools::graph::execute_add_node(ctx, args).await,
                "graph_add_edge" => tools::graph::execute_add_edge(ctx, args).await,
                "graph_query_neighbors" => {
                    tools::graph::execute_query_neighbors(ctx, args).await
                }
                "graph_find_path" => tools::graph::execute_find_path(ctx, args).await,
                name => Err(EngramError::NotFound(format!("unknown tool: {}", name))),
            }
        })
        .await;

        let result = match dispatched {
            Ok(inner) => inner,
            Err(_) => Err(EngramError::Timeout(format!(
                "tool call exceeded {}ms",
                deadline.as_millis()
            ))),
        };

        let response = match result {
            Ok(content) => CallToolResult {
                content: vec![ToolResultContent {
                    content_type: "text".to_string(),
                    text: serde_json::to_string_pretty(&content)
                        .unwrap_or_else(|_| content.to_string()),
                }],
                is_error: Some(false),
            },
            Err(e) => {
                warn!(tool = %request.name, "tool call failed: {}", e);
                CallToolResult {
                    content: vec![ToolResultContent {
                        content_type: "text".to_string(),
                        text: error_payload(&e, &request.name).to_string(),
                    }],
                    is_error: Some(true),
                }
            }
        };

        serde_json::to_value(response).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    /// Handle resources/list.
    fn handle_resources_list(&self) -> Result<serde_json::Value, JsonRpcError> {
        let resource = |uri: &str, name: &str, description: &str| ResourceDescription {
            uri: uri.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            mime_type: Some("application/json".to_string()),
        };

        let result = ListResourcesResult {
            resources: vec![
                resource(
                    "memory://l2-insights",
                    "L2 insights",
                    "Compressed semantic insights; pass ?query=...&top_k=... for hybrid search",
                ),
                resource(
                    "memory://working-memory",
                    "Working memory",
                    "The bounded active context window",
                ),
                resource(
                    "memory://episode-memory",
                    "Episode memory",
                    "Reflection episodes; pass ?query=...&min_similarity=... for recall",
                ),
                resource(
                    "memory://l0-raw",
                    "L0 raw log",
                    "Raw dialogue; filters: session_id, date_range=YYYY-MM-DD:YYYY-MM-DD, limit",
                ),
                resource(
                    "memory://stale-memory",
                    "Stale archive",
                    "Evicted and manually archived items; filter: importance_min",
                ),
            ],
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    /// Handle resources/read.
    async fn handle_resources_read(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: ReadResourceRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("Missing resource URI")),
        };

        let uri = &request.uri;
        let content = if uri.starts_with("memory://") {
            resources::memory::read(&self.ctx, uri).await
        } else {
            Err(ResourceError::NotFound(uri.clone()))
        };

        match content {
            Ok(text) => {
                let result = ReadResourceResult {
                    contents: vec![ResourceContent {
                        uri: uri.clone(),
                        mime_type: Some("application/json".to_string()),
                        text: Some(text),
                        blob: None,
                    }],
                };
                serde_json::to_value(result)
                    .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
            }
            Err(ResourceError::BadRequest(detail)) => {
                Err(JsonRpcError::invalid_params(&detail))
            }
            Err(ResourceError::NotFound(_)) => Err(JsonRpcError::resource_not_found(uri)),
            Err(ResourceError::Internal(e)) => Err(JsonRpcError::internal_error(&e.to_string())),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::test_context;

    fn request(method: &str, params: Option<serde_json::Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: method.to_string(),
            params,
        }
    }

    async fn initialized_server() -> (McpServer, tempfile::TempDir) {
        let (ctx, dir) = test_context();
        let mut server = McpServer::new(ctx);
        server
            .handle_request(request("initialize", None))
            .await
            .unwrap();
        (server, dir)
    }

    #[tokio::test]
    async fn test_requires_initialization() {
        let (ctx, _dir) = test_context();
        let mut server = McpServer::new(ctx);

        let response = server
            .handle_request(request("tools/list", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32003);
    }

    #[tokio::test]
    async fn test_initialize_negotiates_older_version() {
        let (ctx, _dir) = test_context();
        let mut server = McpServer::new(ctx);

        let response = server
            .handle_request(request(
                "initialize",
                Some(serde_json::json!({"protocolVersion": "2024-11-05"})),
            ))
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "engram");
    }

    #[tokio::test]
    async fn test_tools_list_is_complete() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request("tools/list", None))
            .await
            .unwrap();

        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        let names: Vec<String> = tools
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();

        for expected in [
            "ping",
            "store_raw_dialogue",
            "compress_to_l2_insight",
            "store_episode",
            "store_dual_judge_scores",
            "hybrid_search",
            "update_working_memory",
            "get_insight_by_id",
            "list_episodes",
            "graph_add_node",
            "graph_add_edge",
            "graph_query_neighbors",
            "graph_find_path",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
        assert_eq!(names.len(), 13);
    }

    #[tokio::test]
    async fn test_tool_call_success_shape() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request(
                "tools/call",
                Some(serde_json::json!({"name": "ping"})),
            ))
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        let payload: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["response"], "pong");
    }

    #[tokio::test]
    async fn test_tool_call_error_payload() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request(
                "tools/call",
                Some(serde_json::json!({
                    "name": "update_working_memory",
                    "arguments": {"content": "", "importance": 0.5},
                })),
            ))
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        let payload: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["error"], "VALIDATION");
        assert_eq!(payload["tool"], "update_working_memory");
        // The offending input is not echoed back
        assert!(payload["details"].as_str().unwrap().len() < 200);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request(
                "tools/call",
                Some(serde_json::json!({"name": "frobnicate"})),
            ))
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
    }

    #[tokio::test]
    async fn test_resources_list() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request("resources/list", None))
            .await
            .unwrap();

        let resources = response.result.unwrap()["resources"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(resources.len(), 5);
        let uris: Vec<&str> = resources
            .iter()
            .map(|r| r["uri"].as_str().unwrap())
            .collect();
        assert!(uris.contains(&"memory://working-memory"));
        assert!(uris.contains(&"memory://l0-raw"));
    }

    #[tokio::test]
    async fn test_resources_read_unknown_uri() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request(
                "resources/read",
                Some(serde_json::json!({"uri": "memory://nonsense"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32002);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request("tools/destroy", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }
}
