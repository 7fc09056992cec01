//! Search Module
//!
//! - Weighted Reciprocal Rank Fusion for hybrid retrieval
//! - Relational query classification (English/German cue lists)
//! - FTS5 query sanitisation
//! - HNSW dense search (USearch, feature `vector-search`)

mod hybrid;

#[cfg(feature = "vector-search")]
#[cfg_attr(docsrs, doc(cfg(feature = "vector-search")))]
mod vector;

pub use hybrid::{classify_query, weighted_rrf, QueryType, RankedList, ScoredDoc};

#[cfg(feature = "vector-search")]
pub use vector::{VectorIndex, VectorIndexConfig, VectorSearchError};

/// Sanitize free text into a safe FTS5 MATCH expression.
///
/// Each alphanumeric token is double-quoted and the tokens are OR-joined,
/// so operator characters in user queries (`"`, `-`, `*`, parentheses)
/// cannot break the MATCH syntax. Empty input yields an expression that
/// matches nothing.
pub fn sanitize_fts5_query(query: &str) -> String {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if tokens.is_empty() {
        // A quoted empty phrase is valid FTS5 and matches no rows
        "\"\"".to_string()
    } else {
        tokens.join(" OR ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_plain_words() {
        assert_eq!(sanitize_fts5_query("rust memory"), "\"rust\" OR \"memory\"");
    }

    #[test]
    fn test_sanitize_strips_operators() {
        let sanitized = sanitize_fts5_query("NEAR(\"a\" OR b*) - c:d");
        assert!(!sanitized.contains('*'));
        assert!(!sanitized.contains('('));
        assert!(!sanitized.contains(':'));
        assert!(sanitized.contains("\"NEAR\""));
    }

    #[test]
    fn test_sanitize_empty_query() {
        assert_eq!(sanitize_fts5_query(""), "\"\"");
        assert_eq!(sanitize_fts5_query("!!! ---"), "\"\"");
    }
}
