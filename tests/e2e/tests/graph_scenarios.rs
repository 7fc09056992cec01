//! Graph and IEF scenarios: constitutive weighting, nuance penalties,
//! recency decay, supersede semantics, and traversal exclusion.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use engram_core::{
    calculate_ief_score, Direction, IefEdgeData, Metadata, Resolution,
};
use engram_e2e_tests::harness::TestHarness;

fn constitutive_props() -> Metadata {
    let mut props = Metadata::new();
    props.insert("edge_type".into(), serde_json::json!("constitutive"));
    props
}

/// S6: a fresh constitutive edge scores the 1.5 multiplier; listing it as
/// pending costs exactly the 0.1 penalty.
#[tokio::test]
async fn constitutive_edge_and_nuance_penalty() {
    let harness = TestHarness::new();

    let edge_id = harness
        .storage
        .add_edge(
            "engine",
            "index",
            "constitutive",
            None,
            None,
            1.0,
            &constitutive_props(),
        )
        .unwrap();

    let edge = harness.storage.get_edge(&edge_id).unwrap().unwrap();
    let edge_data = harness.storage.ief_edge_data(&edge).unwrap();
    let now = Utc::now();

    let clean = calculate_ief_score(&edge_data, None, None, now, &harness.config.ief);
    assert!((clean.components.constitutive_weight - 1.5).abs() < 1e-12);
    assert!(clean.components.nuance_penalty.abs() < 1e-12);

    let pending: HashSet<String> = [edge_id.clone()].into_iter().collect();
    let penalised =
        calculate_ief_score(&edge_data, None, Some(&pending), now, &harness.config.ief);
    assert!((penalised.components.nuance_penalty - 0.1).abs() < 1e-12);
    assert!((clean.ief_score - penalised.ief_score - 0.1).abs() < 1e-12);
}

/// S7: the recency boost follows exp(-days/30).
#[test]
fn recency_decay_matches_the_curve() {
    let now = Utc::now();
    let config = engram_core::IefConfig::default();

    let at_age = |days: i64| {
        let edge = IefEdgeData {
            edge_id: "e".into(),
            relevance_score: 0.5,
            modified_at: Some(now - Duration::days(days)),
            edge_type: None,
            anchor_embedding: None,
        };
        calculate_ief_score(&edge, None, None, now, &config)
            .components
            .recency_boost
    };

    assert!(at_age(1) > 0.95);
    assert!((0.75..=0.82).contains(&at_age(7)));
    assert!((0.35..=0.40).contains(&at_age(30)));
}

/// Dissonance lifecycle: detect, penalise, supersede, and drop the
/// retired edge from default traversals.
#[tokio::test]
async fn dissonance_supersede_lifecycle() {
    let harness = TestHarness::new();

    let keep = harness
        .storage
        .add_edge("app", "redis", "USES", None, None, 1.0, &Metadata::new())
        .unwrap();
    let retire = harness
        .storage
        .add_edge("app", "redis", "AVOIDS", None, None, 1.0, &Metadata::new())
        .unwrap();

    // Detection registers a pending review over both edges
    let created = harness.dissonance.scan(&harness.storage).unwrap();
    assert_eq!(created.len(), 1);
    let pending = harness.dissonance.get_pending_nuance_edge_ids();
    assert!(pending.contains(&keep) && pending.contains(&retire));

    // Pending membership penalises the IEF score
    let edge = harness.storage.get_edge(&keep).unwrap().unwrap();
    let edge_data = harness.storage.ief_edge_data(&edge).unwrap();
    let now = Utc::now();
    let penalised =
        calculate_ief_score(&edge_data, None, Some(&pending), now, &harness.config.ief);
    assert!((penalised.components.nuance_penalty - 0.1).abs() < 1e-12);

    // Supersede: the losing edge is retired and the penalty lifts
    harness
        .dissonance
        .resolve(
            &created[0].id,
            Resolution::Supersede {
                surviving_edge_id: keep.clone(),
            },
            &harness.storage,
        )
        .unwrap();

    assert!(harness.dissonance.get_pending_nuance_edge_ids().is_empty());

    let retired = harness.storage.get_edge(&retire).unwrap().unwrap();
    assert_eq!(retired.superseded_by(), Some(keep.as_str()));

    let visible = harness
        .storage
        .query_neighbors("app", None, 1, Direction::Both, false)
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].edge_id, keep);

    let with_retired = harness
        .storage
        .query_neighbors("app", None, 1, Direction::Both, true)
        .unwrap();
    assert_eq!(with_retired.len(), 2);
}

/// Edge upserts are idempotent on (source, target, relation), so re-adding
/// an edge preserves its identity.
#[tokio::test]
async fn edge_upsert_preserves_identity() {
    let harness = TestHarness::new();

    let first = harness
        .storage
        .add_edge("parser", "lexer", "DEPENDS_ON", None, None, 1.0, &Metadata::new())
        .unwrap();
    let second = harness
        .storage
        .add_edge("parser", "lexer", "DEPENDS_ON", None, None, 0.8, &Metadata::new())
        .unwrap();

    assert_eq!(first, second);
    let edge = harness.storage.get_edge(&first).unwrap().unwrap();
    assert!((edge.weight - 0.8).abs() < 1e-12);
}

/// Shortest-path discovery with a deadline returns the minimal route.
#[tokio::test]
async fn shortest_path_over_a_diamond() {
    let harness = TestHarness::new();

    for (s, t) in [("a", "b"), ("b", "z"), ("a", "c"), ("c", "d"), ("d", "z")] {
        harness
            .storage
            .add_edge(s, t, "RELATED_TO", None, None, 1.0, &Metadata::new())
            .unwrap();
    }

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    let result = harness.storage.find_path("a", "z", 5, deadline).unwrap();

    assert!(result.path_found);
    assert_eq!(result.path_length, 2);
    assert_eq!(result.paths[0].len(), 3);
    assert_eq!(result.paths[0][0].name, "a");
    assert_eq!(result.paths[0][2].name, "z");
}

/// The semantic anchor feeds IEF similarity through the source node.
#[tokio::test]
async fn ief_similarity_reads_the_anchor_insight() {
    let harness = TestHarness::new();

    let anchored = harness.seed_insight("query planner statistics").await;
    harness
        .storage
        .upsert_node("component", "planner", &Metadata::new(), Some(&anchored.id))
        .unwrap();
    let edge_id = harness
        .storage
        .add_edge("planner", "executor", "USES", None, None, 1.0, &Metadata::new())
        .unwrap();

    let edge = harness.storage.get_edge(&edge_id).unwrap().unwrap();
    let edge_data = harness.storage.ief_edge_data(&edge).unwrap();
    assert!(edge_data.anchor_embedding.is_some());

    // A query embedding equal to the anchor maximises similarity
    let query = harness.embedder.embed("query planner statistics").await.unwrap();
    let now = Utc::now();
    let score = calculate_ief_score(
        &edge_data,
        Some(&query.vector),
        None,
        now,
        &harness.config.ief,
    );
    assert!(score.components.semantic_similarity > 0.99);
}
