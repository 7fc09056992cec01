//! stdio Transport for MCP
//!
//! Handles JSON-RPC communication over stdin/stdout. Logging goes to
//! stderr; stdout carries nothing but protocol lines.

use std::io::{self, BufRead, BufReader, Write};
use tracing::{debug, error, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;

/// stdio Transport for the MCP server
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }

    /// Run the server loop until stdin reaches EOF.
    pub async fn run(self, mut server: McpServer) -> Result<(), io::Error> {
        let stdin = io::stdin();
        let stdout = io::stdout();

        let reader = BufReader::new(stdin.lock());
        let mut stdout = stdout.lock();

        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    error!("Failed to read line: {}", e);
                    break;
                }
            };

            if line.is_empty() {
                continue;
            }

            debug!("Received: {} bytes", line.len());

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Failed to parse request: {}", e);
                    let error_response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                    Self::write_response(&mut stdout, &error_response)?;
                    continue;
                }
            };

            if let Some(response) = server.handle_request(request).await {
                Self::write_response(&mut stdout, &response)?;
            }
        }

        Ok(())
    }

    fn write_response(
        stdout: &mut impl Write,
        response: &JsonRpcResponse,
    ) -> Result<(), io::Error> {
        match serde_json::to_string(response) {
            Ok(json) => {
                debug!("Sending: {} bytes", json.len());
                writeln!(stdout, "{}", json)?;
                stdout.flush()
            }
            Err(e) => {
                error!("Failed to serialize response: {}", e);
                // Minimal fallback so the client doesn't hang on a request
                let fallback = r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;
                writeln!(stdout, "{}", fallback)?;
                stdout.flush()
            }
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}
