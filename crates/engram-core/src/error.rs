//! Error Taxonomy
//!
//! A single error enum shared by every component. Each variant maps to one
//! wire-level kind string so the protocol layer can report structured
//! `{error, details, tool}` objects without inspecting variant payloads.
//!
//! Lookups for a specific id never produce `NotFound` — they return
//! `Option`/status pairs instead, so write-then-verify flows need no
//! control-flow exceptions. `NotFound` is reserved for operations that
//! cannot proceed without the missing row (e.g. archiving a working item
//! that does not exist).

/// Core error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    /// Input fails a precondition (missing field, out-of-range number,
    /// wrong collection type). Message names the offending field.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist and the operation cannot proceed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Database error. Detail is redacted to the SQLite error class only.
    #[error("storage error: {0}")]
    Storage(String),

    /// Embedding provider failed after all retries.
    #[error("embedding provider failed: {0}")]
    Embedding(String),

    /// Scorer provider failed after all retries.
    #[error("evaluation provider failed: {0}")]
    Evaluation(String),

    /// Deadline exceeded; in-flight work was cancelled.
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    /// Anything else. Never carries secrets or caller input.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Core result type
pub type Result<T> = std::result::Result<T, EngramError>;

impl EngramError {
    /// Wire-level kind string for structured protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            EngramError::Validation(_) => "VALIDATION",
            EngramError::NotFound(_) => "NOT_FOUND",
            EngramError::Storage(_) => "STORAGE",
            EngramError::Embedding(_) => "EMBEDDING",
            EngramError::Evaluation(_) => "EVALUATION",
            EngramError::Timeout(_) => "TIMEOUT",
            EngramError::Internal(_) => "INTERNAL",
        }
    }

    /// Validation helper naming the offending field.
    pub fn field(field: &str, problem: &str) -> Self {
        EngramError::Validation(format!("{}: {}", field, problem))
    }
}

impl From<rusqlite::Error> for EngramError {
    fn from(e: rusqlite::Error) -> Self {
        // Redact statement text: only the error class crosses the boundary.
        match e {
            rusqlite::Error::SqliteFailure(code, _) => {
                EngramError::Storage(format!("sqlite failure ({:?})", code.code))
            }
            rusqlite::Error::QueryReturnedNoRows => {
                EngramError::Storage("query returned no rows".to_string())
            }
            other => EngramError::Storage(format!("sqlite error: {}", classify(&other))),
        }
    }
}

fn classify(e: &rusqlite::Error) -> &'static str {
    match e {
        rusqlite::Error::InvalidColumnType(..) => "invalid column type",
        rusqlite::Error::InvalidColumnIndex(_) => "invalid column index",
        rusqlite::Error::InvalidParameterName(_) => "invalid parameter name",
        rusqlite::Error::ToSqlConversionFailure(_) => "parameter conversion failure",
        rusqlite::Error::FromSqlConversionFailure(..) => "row conversion failure",
        _ => "statement failed",
    }
}

impl From<std::io::Error> for EngramError {
    fn from(e: std::io::Error) -> Self {
        EngramError::Internal(format!("io error: {}", e.kind()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
