//! Hybrid retrieval scenarios: RRF ordering with stubbed lists, fusion
//! determinism, graph injection, the L0 round-trip, and embedding retry.

use std::sync::Arc;

use engram_core::{
    weighted_rrf, DialogueInput, EmbeddingClient, FusionWeights, Metadata, RankedList,
    RetrievalEngine, Storage,
};
use engram_e2e_tests::harness::{fast_retry, TestHarness};
use engram_e2e_tests::mocks::{FlakyEmbeddingProvider, MOCK_DIMENSIONS};

fn ranked(ids: &[&str]) -> Vec<(String, f64)> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| (id.to_string(), 1.0 - 0.1 * i as f64))
        .collect()
}

/// S4: dense [A,B,C,D,E] at 0.7 and lexical [C,F,A,G,H] at 0.3 fuse with
/// A and C ahead of every single-list document.
#[test]
fn stubbed_rrf_fusion_ranks_shared_docs_first() {
    let lists = [
        RankedList {
            source: "semantic",
            weight: 0.7,
            docs: ranked(&["A", "B", "C", "D", "E"]),
        },
        RankedList {
            source: "keyword",
            weight: 0.3,
            docs: ranked(&["C", "F", "A", "G", "H"]),
        },
    ];

    let fused = weighted_rrf(&lists, 60.0, 5);
    let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();

    assert_eq!(order[0], "A");
    assert_eq!(order[1], "C");
    let position = |id: &str| order.iter().position(|x| *x == id).unwrap_or(usize::MAX);
    for single in ["B", "D", "E", "F"] {
        assert!(position("A") < position(single));
        assert!(position("C") < position(single));
    }

    // Hand-checked contributions for the top document
    let a_score = 0.7 / 61.0 + 0.3 / 63.0;
    assert!((fused[0].1 - a_score).abs() < 1e-12);
}

/// Fixed candidate lists always fuse to the same ordering.
#[test]
fn rrf_is_deterministic_for_fixed_lists() {
    let lists = [
        RankedList {
            source: "semantic",
            weight: 0.6,
            docs: ranked(&["x", "y", "z", "w"]),
        },
        RankedList {
            source: "keyword",
            weight: 0.2,
            docs: ranked(&["w", "x"]),
        },
        RankedList {
            source: "graph",
            weight: 0.2,
            docs: ranked(&["z"]),
        },
    ];

    let first = weighted_rrf(&lists, 60.0, 10);
    for _ in 0..10 {
        assert_eq!(weighted_rrf(&lists, 60.0, 10), first);
    }
}

/// End-to-end: the engine reports counts, echoed weights, and the query
/// classification alongside the fused hits.
#[tokio::test]
async fn hybrid_search_reports_counts_and_weights() {
    let harness = TestHarness::new();
    harness.seed_insight("the fusion constant dampens top ranks").await;
    harness.seed_insight("unrelated cooking recipe").await;

    let result = harness
        .retrieval
        .hybrid_search("fusion constant ranks", Some(5), None, None)
        .await
        .unwrap();

    assert!(!result.results.is_empty());
    assert_eq!(result.results[0].content, "the fusion constant dampens top ranks");
    assert!(result.counts.keyword_results_count >= 1);
    assert!((result.weights.semantic - 0.7).abs() < 1e-12);
    assert!((result.weights.keyword - 0.3).abs() < 1e-12);
    assert_eq!(result.query_type.as_str(), "standard");
}

/// A graph-anchored insight reaches the fused results through entity
/// matching even when relational weights apply.
#[tokio::test]
async fn graph_injection_lifts_anchored_insights() {
    let harness = TestHarness::new();

    let anchored = harness.seed_insight("caching keeps the hot set resident").await;
    harness
        .storage
        .upsert_node("technology", "redis", &Metadata::new(), Some(&anchored.id))
        .unwrap();
    harness
        .storage
        .add_edge("service", "redis", "USES", None, None, 1.0, &Metadata::new())
        .unwrap();

    let result = harness
        .retrieval
        .hybrid_search(
            "how is the service connected to redis",
            Some(5),
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.query_type.as_str(), "relational");
    assert!(result.counts.graph_results_count >= 1);
    assert!(result.results.iter().any(|hit| hit.id == anchored.id));
}

/// Caller-supplied weights are used verbatim and echoed back.
#[tokio::test]
async fn explicit_weights_override_configuration() {
    let harness = TestHarness::new();
    harness.seed_insight("weight override check").await;

    let custom = FusionWeights {
        semantic: 0.2,
        keyword: 0.8,
        graph: 0.0,
    };
    let result = harness
        .retrieval
        .hybrid_search("weight override", Some(3), Some(custom), None)
        .await
        .unwrap();

    assert!((result.weights.keyword - 0.8).abs() < 1e-12);
}

/// L0 round-trip: a stored turn comes back through the session filter.
#[tokio::test]
async fn raw_dialogue_roundtrip() {
    let harness = TestHarness::new();

    let entry = harness
        .storage
        .append_raw(&DialogueInput {
            session_id: "sess-7".into(),
            speaker: "user".into(),
            content: "switch the cache to LRU".into(),
            metadata: Metadata::new(),
        })
        .unwrap();

    let listed = harness
        .storage
        .list_raw(Some("sess-7"), None, None, 10)
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, entry.id);
    assert_eq!(listed[0].content, "switch the cache to LRU");
}

/// A transiently failing embedding provider succeeds within the retry
/// budget; search proceeds normally.
#[tokio::test]
async fn embedding_retry_recovers_from_transient_outage() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = engram_core::EngramConfig::default();
    config.data_dir = Some(dir.path().to_path_buf());
    config.embedding.dimensions = MOCK_DIMENSIONS;
    config.retry = fast_retry();

    let storage = Arc::new(Storage::new(&config).unwrap());
    // Two failures, then healthy; the 4-attempt budget absorbs them
    let embedder = EmbeddingClient::new(
        Arc::new(FlakyEmbeddingProvider::new(2)),
        &config.embedding,
        config.retry,
        &config.timeouts,
        None,
    );
    let retrieval = RetrievalEngine::new(Arc::clone(&storage), embedder.clone());

    let embedding = embedder.embed("stored despite the outage").await.unwrap();
    storage
        .insert_insight(
            &engram_core::InsightInput {
                content: "stored despite the outage".into(),
                source_ids: vec![],
                metadata: Metadata::new(),
            },
            &embedding,
        )
        .unwrap();

    let result = retrieval
        .hybrid_search("outage", Some(3), None, None)
        .await
        .unwrap();
    assert!(!result.results.is_empty());
}

/// A provider that never recovers surfaces EMBEDDING after the retries.
#[tokio::test]
async fn exhausted_retries_surface_embedding_error() {
    let harness = TestHarness::with_provider(Arc::new(FlakyEmbeddingProvider::new(u32::MAX)));
    let err = harness.embedder.embed("never succeeds").await.unwrap_err();
    assert_eq!(err.kind(), "EMBEDDING");
}
