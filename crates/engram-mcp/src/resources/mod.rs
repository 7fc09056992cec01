//! MCP Resources
//!
//! Read-only `memory://` views over the tiers. Resources never mutate
//! state; invalid parameters map to invalid-params, unknown URIs to
//! resource-not-found.

pub mod memory;

/// Resource read failure modes, mapped to protocol errors by the server.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// Malformed query parameter (protocol 400).
    #[error("invalid parameter: {0}")]
    BadRequest(String),
    /// Unknown resource path (protocol 404).
    #[error("unknown resource: {0}")]
    NotFound(String),
    /// Anything else.
    #[error("{0}")]
    Internal(#[from] engram_core::EngramError),
}
