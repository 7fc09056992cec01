//! Working-memory eviction scenarios: capacity bound, critical
//! protection, forced fallback, archive-before-delete, atomicity.

use engram_e2e_tests::harness::TestHarness;
use engram_core::ArchiveReason;

/// Capacity 10, uniform importance: the 11th insert evicts the first
/// item into the stale archive and reports matching evicted/archived ids.
#[tokio::test]
async fn eleven_uniform_updates_evict_the_oldest() {
    let harness = TestHarness::new();

    let mut last = None;
    for i in 1..=11 {
        last = Some(
            harness
                .storage
                .update_working_memory(&format!("m{}", i), 0.5)
                .unwrap(),
        );
    }

    assert_eq!(harness.storage.count_working().unwrap(), 10);

    let update = last.unwrap();
    let evicted = update.evicted_id.expect("call 11 must evict");
    assert_eq!(Some(&evicted), update.archived_id.as_ref());

    let stale = harness.storage.list_stale(0.0, 10).unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, evicted);
    assert_eq!(stale[0].original_content, "m1");
    assert_eq!(stale[0].reason, ArchiveReason::LruEviction);
}

/// Ten critical items, then one casual insert: the casual item is the
/// only evictable one and goes straight to the archive.
#[tokio::test]
async fn critical_items_survive_a_casual_insert() {
    let harness = TestHarness::new();

    for i in 1..=10 {
        harness
            .storage
            .update_working_memory(&format!("crit-{}", i), 0.9)
            .unwrap();
    }
    let update = harness.storage.update_working_memory("casual", 0.5).unwrap();

    assert_eq!(harness.storage.count_working().unwrap(), 10);
    assert_eq!(update.evicted_id.as_deref(), Some(update.added_id.as_str()));

    let stale = harness.storage.list_stale(0.0, 10).unwrap();
    assert_eq!(stale[0].original_content, "casual");

    let survivors = harness.storage.list_working().unwrap();
    assert!(survivors.iter().all(|item| item.importance > 0.8));
}

/// Eleven critical items: forced fallback evicts the oldest regardless
/// of importance.
#[tokio::test]
async fn forced_eviction_when_everything_is_critical() {
    let harness = TestHarness::new();

    for i in 1..=10 {
        harness
            .storage
            .update_working_memory(&format!("crit-{}", i), 0.9)
            .unwrap();
    }
    let update = harness
        .storage
        .update_working_memory("crit-11", 0.85)
        .unwrap();

    assert_eq!(harness.storage.count_working().unwrap(), 10);
    assert!(update.evicted_id.is_some());

    let stale = harness.storage.list_stale(0.0, 10).unwrap();
    assert_eq!(stale[0].original_content, "crit-1");
    assert!((stale[0].importance - 0.9).abs() < 1e-12);
    assert_eq!(stale[0].reason, ArchiveReason::LruEviction);

    // crit-11 itself survived
    let survivors = harness.storage.list_working().unwrap();
    assert!(survivors.iter().any(|item| item.content == "crit-11"));
}

/// The archive copy carries the same content and importance as the
/// deleted working item.
#[tokio::test]
async fn archive_before_delete_preserves_the_item() {
    let harness = TestHarness::new();

    for i in 1..=11 {
        harness
            .storage
            .update_working_memory(&format!("note-{}", i), 0.42)
            .unwrap();
    }

    let stale = harness.storage.list_stale(0.0, 10).unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].original_content, "note-1");
    assert!((stale[0].importance - 0.42).abs() < 1e-12);

    // The evicted item is gone from working memory
    let survivors = harness.storage.list_working().unwrap();
    assert!(survivors.iter().all(|item| item.content != "note-1"));
}

/// Validation failures leave the database untouched.
#[tokio::test]
async fn failed_updates_are_atomic() {
    let harness = TestHarness::new();

    harness.storage.update_working_memory("kept", 0.5).unwrap();

    assert!(harness.storage.update_working_memory("", 0.5).is_err());
    assert!(harness.storage.update_working_memory("x", -0.1).is_err());
    assert!(harness.storage.update_working_memory("x", 1.1).is_err());
    assert!(harness
        .storage
        .update_working_memory("x", f64::INFINITY)
        .is_err());

    assert_eq!(harness.storage.count_working().unwrap(), 1);
    assert!(harness.storage.list_stale(0.0, 10).unwrap().is_empty());
}

/// Capacity holds across many sequential updates.
#[tokio::test]
async fn capacity_invariant_holds_over_many_updates() {
    let harness = TestHarness::new();

    for i in 0..50 {
        let importance = (i % 10) as f64 / 10.0;
        harness
            .storage
            .update_working_memory(&format!("bulk-{}", i), importance)
            .unwrap();
        assert!(harness.storage.count_working().unwrap() <= 10);
    }

    assert_eq!(harness.storage.count_working().unwrap(), 10);
    assert_eq!(harness.storage.list_stale(0.0, 100).unwrap().len(), 40);
}

/// Manual archival stamps MANUAL_ARCHIVE and removes the item atomically.
#[tokio::test]
async fn manual_archive_roundtrip() {
    let harness = TestHarness::new();

    let update = harness
        .storage
        .update_working_memory("to be shelved", 0.7)
        .unwrap();
    let archived = harness
        .storage
        .archive_working_item(&update.added_id)
        .unwrap();

    assert_eq!(archived.id, update.added_id);
    assert_eq!(archived.reason, ArchiveReason::ManualArchive);
    assert_eq!(harness.storage.count_working().unwrap(), 0);

    let stale = harness.storage.list_stale(0.0, 10).unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].original_content, "to be shelved");
}

/// Concurrent updates serialise on the writer; the bound never breaks.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_respect_capacity() {
    let harness = TestHarness::new();
    let storage = std::sync::Arc::clone(&harness.storage);

    let mut handles = Vec::new();
    for i in 0..24 {
        let storage = std::sync::Arc::clone(&storage);
        handles.push(tokio::task::spawn_blocking(move || {
            storage.update_working_memory(&format!("concurrent-{}", i), 0.5)
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(harness.storage.count_working().unwrap(), 10);
    assert_eq!(harness.storage.list_stale(0.0, 100).unwrap().len(), 14);
}
