//! Dual-judge evaluation scenarios: Cohen's kappa on scripted scores,
//! neutral degradation, persistence, and episode reinforcement records.

use std::sync::Arc;

use engram_core::{cohen_kappa, DualJudgePipeline, EpisodeInput, JudgedDoc};
use engram_e2e_tests::harness::{fast_retry, TestHarness};
use engram_e2e_tests::mocks::{DownScorer, ScriptedScorer};

fn docs(contents: &[&str]) -> Vec<JudgedDoc> {
    contents
        .iter()
        .enumerate()
        .map(|(i, content)| JudgedDoc {
            id: format!("d{}", i + 1),
            content: content.to_string(),
        })
        .collect()
}

/// S5: judge1 [0.8,0.6,0.3,0.9,0.4] and judge2 [0.7,0.6,0.2,0.8,0.4]
/// binarise identically, so kappa is exactly 1.
#[tokio::test]
async fn scripted_judges_reach_perfect_agreement() {
    let harness = TestHarness::new();
    let candidates = docs(&["alpha", "bravo", "charlie", "delta", "echo"]);

    let judge1 = ScriptedScorer::new(
        "scripted/one",
        &[
            ("alpha", 0.8),
            ("bravo", 0.6),
            ("charlie", 0.3),
            ("delta", 0.9),
            ("echo", 0.4),
        ],
    );
    let judge2 = ScriptedScorer::new(
        "scripted/two",
        &[
            ("alpha", 0.7),
            ("bravo", 0.6),
            ("charlie", 0.2),
            ("delta", 0.8),
            ("echo", 0.4),
        ],
    );

    let pipeline = DualJudgePipeline::new(
        Arc::new(judge1),
        Arc::new(judge2),
        fast_retry(),
        &harness.config.timeouts,
        None,
    );

    let outcome = pipeline.score_docs("ranking query", &candidates).await;
    assert_eq!(outcome.judge1_scores, vec![0.8, 0.6, 0.3, 0.9, 0.4]);
    assert_eq!(outcome.judge2_scores, vec![0.7, 0.6, 0.2, 0.8, 0.4]);
    assert!((outcome.kappa.unwrap() - 1.0).abs() < 1e-12);

    // Persist and read back through ground truth
    harness
        .storage
        .insert_ground_truth("gt-1", "ranking query", &[], &outcome)
        .unwrap();
    let stored = harness.storage.get_ground_truth("gt-1").unwrap().unwrap();
    assert_eq!(stored.judge1_model, "scripted/one");
    assert!((stored.kappa.unwrap() - 1.0).abs() < 1e-12);
}

/// Unanimous judges make kappa undefined; the sentinel is None/NULL.
#[tokio::test]
async fn unanimous_judges_yield_undefined_kappa() {
    let harness = TestHarness::new();
    let candidates = docs(&["one", "two"]);

    let judge1 = ScriptedScorer::new("scripted/one", &[("one", 0.9), ("two", 0.8)]);
    let judge2 = ScriptedScorer::new("scripted/two", &[("one", 0.7), ("two", 0.95)]);

    let pipeline = DualJudgePipeline::new(
        Arc::new(judge1),
        Arc::new(judge2),
        fast_retry(),
        &harness.config.timeouts,
        None,
    );

    let outcome = pipeline.score_docs("q", &candidates).await;
    assert!(outcome.kappa.is_none());

    harness
        .storage
        .insert_ground_truth("gt-2", "q", &[], &outcome)
        .unwrap();
    let stored = harness.storage.get_ground_truth("gt-2").unwrap().unwrap();
    assert!(stored.kappa.is_none());
}

/// One judge down for the whole batch: its scores degrade to 0.5 while
/// the other's stand, and the batch still persists.
#[tokio::test]
async fn judge_outage_degrades_to_neutral_scores() {
    let harness = TestHarness::new();
    let candidates = docs(&["first", "second", "third"]);

    let healthy = ScriptedScorer::new(
        "scripted/healthy",
        &[("first", 0.9), ("second", 0.1), ("third", 0.6)],
    );

    let pipeline = DualJudgePipeline::new(
        Arc::new(DownScorer),
        Arc::new(healthy),
        fast_retry(),
        &harness.config.timeouts,
        None,
    );

    let outcome = pipeline.score_docs("resilience", &candidates).await;
    assert_eq!(outcome.judge1_scores, vec![0.5, 0.5, 0.5]);
    assert_eq!(outcome.judge2_scores, vec![0.9, 0.1, 0.6]);
}

/// The kappa helper handles the documented edge cases directly.
#[test]
fn kappa_edge_cases() {
    // Perfect disagreement
    let kappa = cohen_kappa(&[0.9, 0.1], &[0.1, 0.9]).unwrap();
    assert!((-1.0..0.0).contains(&kappa));

    // Independent-looking marginals land between the extremes
    let kappa = cohen_kappa(&[0.9, 0.9, 0.1, 0.1], &[0.9, 0.1, 0.9, 0.1]).unwrap();
    assert!(kappa.abs() < 1.0);

    // Undefined cases
    assert!(cohen_kappa(&[], &[]).is_none());
    assert!(cohen_kappa(&[0.9], &[0.9, 0.8]).is_none());
    assert!(cohen_kappa(&[0.9, 0.9], &[0.9, 0.9]).is_none());
}

/// Episode reinforcement: store with a reward, recall by similarity.
#[tokio::test]
async fn episode_reinforcement_roundtrip() {
    let harness = TestHarness::new();

    let embedding = harness.embedder.embed("eviction tuning session").await.unwrap();
    let episode = harness
        .storage
        .insert_episode(
            &EpisodeInput {
                query: "eviction tuning session".into(),
                reward: -0.4,
                reflection: "lowering the threshold thrashed the cache".into(),
            },
            &embedding,
        )
        .unwrap();

    let listed = harness.storage.list_episodes(5).unwrap();
    assert_eq!(listed.len(), 1);
    assert!((listed[0].reward + 0.4).abs() < 1e-12);

    let query = harness.embedder.embed("eviction tuning session").await.unwrap();
    let hits = harness
        .storage
        .episode_search(&query.vector, 0.9, 5)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0.id, episode.id);
}
