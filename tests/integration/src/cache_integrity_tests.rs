//! Document cache integrity through the node context
//!
//! # Test Scenarios
//!
//! 1. **Idempotent Sync**: a second read with no new events changes nothing
//! 2. **Tamper Purge**: a receipt at a different height empties the owner cache
//! 3. **Owner Isolation**: a purge for one owner leaves others intact
//! 4. **Window Failure**: a failed window is retried rather than skipped
//! 5. **Persistence**: a reopened cache resumes from its cursor

use crate::test_utils::{owner, upload, TestNode, CONTRACT};
use provenance_cache::{CacheStore, DocumentIndex, LedgerClient, MemoryLedger, TamperFinding};
use provenance_core::{CacheConfig, LedgerConfig};
use std::sync::Arc;

#[tokio::test]
async fn test_second_read_is_idempotent() {
    let harness = TestNode::new(0.1, 100);
    let alice = owner(1);
    for id in 1..=5 {
        harness.ledger.emit(CONTRACT, &upload(id, &alice), id * 10).unwrap();
    }

    let first = harness.node.documents().list(&alice).await.unwrap();
    assert_eq!(first.documents.len(), 5);
    let records = harness.cache().get(&alice).unwrap();
    let cursor = harness.cache().get_cursor(&alice).unwrap();
    assert_eq!(cursor, Some(50));

    let second = harness.node.documents().list(&alice).await.unwrap();
    assert_eq!(second.documents, first.documents);
    let sync = second.sync.unwrap();
    assert!(sync.windows.is_empty());
    assert_eq!(sync.inserted, 0);
    assert_eq!(harness.cache().get(&alice).unwrap(), records);
    assert_eq!(harness.cache().get_cursor(&alice).unwrap(), cursor);

    // 10% of five records still samples one.
    assert_eq!(second.tamper.unwrap().checks.len(), 1);
}

#[tokio::test]
async fn test_receipt_height_mismatch_purges_owner() {
    let harness = TestNode::new(0.1, 100);
    let alice = owner(1);
    let tx = harness.ledger.emit(CONTRACT, &upload(1, &alice), 12).unwrap();
    harness.node.documents().list(&alice).await.unwrap();
    assert_eq!(harness.cache().get_cursor(&alice).unwrap(), Some(12));

    harness.ledger.tamper_receipt(&tx, |receipt| receipt.block_height = 13);

    let outcome = harness.node.documents().list(&alice).await.unwrap();
    assert!(outcome.purged());
    assert!(outcome.documents.is_empty());
    let report = outcome.tamper.unwrap();
    assert!(matches!(report.checks[0].finding, TamperFinding::Mismatch(_)));
    assert!(harness.cache().get(&alice).unwrap().is_empty());
    assert_eq!(harness.cache().get_cursor(&alice).unwrap(), None);
}

#[tokio::test]
async fn test_tampered_cache_row_is_caught() {
    let harness = TestNode::new(1.0, 100);
    let alice = owner(1);
    let tx = harness.ledger.emit(CONTRACT, &upload(1, &alice), 5).unwrap();
    harness.node.documents().list(&alice).await.unwrap();

    // Rewrite the cached row behind the cache's back.
    harness.cache().purge(&alice).unwrap();
    let mut forged = upload(1, &alice).into_record(&tx, 5, MemoryLedger::timestamp_at(5));
    forged.filename = "invoice-final-FINAL.pdf".to_string();
    harness.cache().upsert_batch(&[forged]).unwrap();

    let outcome = harness.node.documents().list(&alice).await.unwrap();
    assert!(outcome.purged());
}

#[tokio::test]
async fn test_purge_is_isolated_per_owner() {
    let harness = TestNode::new(1.0, 100);
    let alice = owner(1);
    let bob = owner(2);
    let alice_tx = harness.ledger.emit(CONTRACT, &upload(1, &alice), 3).unwrap();
    harness.ledger.emit(CONTRACT, &upload(2, &bob), 4).unwrap();

    harness.node.documents().list(&alice).await.unwrap();
    harness.node.documents().list(&bob).await.unwrap();

    harness.ledger.remove_receipt(&alice_tx);
    assert!(harness.node.documents().list(&alice).await.unwrap().purged());

    let bob_view = harness.node.documents().list(&bob).await.unwrap();
    assert!(!bob_view.purged());
    assert_eq!(bob_view.documents.len(), 1);
    assert_eq!(harness.cache().get_cursor(&bob).unwrap(), Some(4));
}

#[tokio::test]
async fn test_failed_window_is_retried() {
    let harness = TestNode::new(0.5, 10);
    let alice = owner(7);
    harness.ledger.emit(CONTRACT, &upload(1, &alice), 4).unwrap();
    harness.ledger.emit(CONTRACT, &upload(2, &alice), 14).unwrap();
    harness.ledger.emit(CONTRACT, &upload(3, &alice), 24).unwrap();
    harness.ledger.fail_range(10, 19);

    let partial = harness.node.documents().list(&alice).await.unwrap();
    let sync = partial.sync.unwrap();
    assert_eq!(sync.failed_windows.len(), 1);
    assert_eq!(partial.documents.len(), 2);
    assert_eq!(harness.cache().get_cursor(&alice).unwrap(), Some(9));

    harness.ledger.clear_failures();
    let healed = harness.node.documents().list(&alice).await.unwrap();
    let ids: Vec<u64> = healed.documents.iter().map(|d| d.record_id).collect();
    assert_eq!(ids, vec![3, 2, 1]);
    assert_eq!(harness.cache().get_cursor(&alice).unwrap(), Some(24));

    // Every query respected the ledger's range limit.
    let limit = harness.ledger.max_block_range();
    assert!(harness
        .ledger
        .queries()
        .iter()
        .all(|(from, to)| to - from + 1 <= limit));
}

#[tokio::test]
async fn test_reopened_cache_resumes_from_cursor() {
    let dir = crate::test_utils::temp_dir("provenance_cache");
    let db_path = dir.join("documents.db");
    let alice = owner(3);
    let ledger = Arc::new(MemoryLedger::new(100));
    ledger.emit(CONTRACT, &upload(1, &alice), 20).unwrap();

    let ledger_config = LedgerConfig {
        contract_address: CONTRACT.to_string(),
        deployment_height: 0,
        max_block_range: 100,
    };
    let cache_config = CacheConfig {
        db_path: db_path.clone(),
        sample_fraction: 1.0,
    };

    {
        let store = Arc::new(CacheStore::open(&db_path).unwrap());
        let index = DocumentIndex::new(store, ledger.clone(), &ledger_config, &cache_config);
        assert_eq!(index.list(&alice).await.unwrap().documents.len(), 1);
    }

    ledger.emit(CONTRACT, &upload(2, &alice), 30).unwrap();
    let store = Arc::new(CacheStore::open(&db_path).unwrap());
    let index = DocumentIndex::new(store, ledger.clone(), &ledger_config, &cache_config);
    let outcome = index.list(&alice).await.unwrap();

    assert_eq!(outcome.documents.len(), 2);
    assert_eq!(outcome.sync.unwrap().windows[0].from_height, 21);
    assert_eq!(index.store().stats().unwrap().documents, 2);

    std::fs::remove_dir_all(dir).ok();
}
