//! Execution provenance across identity, trace, storage and verification
//!
//! # Test Scenarios
//!
//! 1. **Step Order**: a prompt/response run and its reversal give different roots
//! 2. **Full Run**: node run → stored trace → credential → anchored verification
//! 3. **Offline Reproduction**: roots and per-step proofs rebuilt from exported JSON
//! 4. **Substituted Trace**: an anchored root that no trace reproduces fails
//! 5. **Recorder Reuse**: reset between runs gives independent, reproducible runs

use crate::test_utils::{fixed_clock, TestNode};
use ed25519_dalek::{Signature, Verifier};
use provenance_core::{combine, digest, Digest, HashTree};
use provenance_identity::{parse_identifier, verify_credential, CredentialIssuer, Identity};
use provenance_trace::{
    fetch_json, verify_trace, ContentStore, ExecutionTrace, MemoryContentStore, ProvenanceVerifier,
    RunState, TraceRecorder,
};
use rand::Rng;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn committed(identifier: &str) -> TraceRecorder {
    let mut recorder = TraceRecorder::with_clock(identifier, fixed_clock(1_720_000_000));
    let mut metadata = BTreeMap::new();
    metadata.insert("source".to_string(), json!("upload"));
    recorder
        .commit_inputs(
            "bafy-input",
            vec!["first chunk".into(), "second chunk".into()],
            metadata,
        )
        .unwrap();
    recorder
}

#[test]
fn test_step_order_changes_root() {
    let identity = Identity::from_seed(&[11u8; 32]).unwrap();

    let mut forward = committed(identity.identifier());
    forward.log_step("prompt", json!("Q")).unwrap();
    forward.log_step("response", json!("A")).unwrap();
    let hashes = forward.step_digests().unwrap();
    let root = forward.compute_execution_root().unwrap();
    assert_eq!(root, combine(&hashes[0], &hashes[1]));
    assert_eq!(root, forward.compute_execution_root().unwrap());

    let mut reversed = committed(identity.identifier());
    reversed.log_step("response", json!("A")).unwrap();
    reversed.log_step("prompt", json!("Q")).unwrap();
    assert_ne!(root, reversed.compute_execution_root().unwrap());

    // Same inputs, same clock: same input root regardless of step order.
    assert_eq!(forward.input_root(), reversed.input_root());
}

#[tokio::test]
async fn test_full_run_is_verifiable() {
    let harness = TestNode::new(0.5, 100);
    let node = &harness.node;

    let mut run = node.begin_run();
    let input_root = run
        .commit_inputs("bafy-report", vec!["page one".into(), "page two".into()], BTreeMap::new())
        .unwrap();
    run.log_step("prompt", json!({"text": "Summarize the report"})).unwrap();
    run.log_step("tool_call", json!({"tool": "retrieve", "k": 3})).unwrap();
    run.log_step("response", json!({"text": "The report says..."})).unwrap();

    let receipt = node
        .finish_run(run, &json!({"output": "The report says..."}))
        .await
        .unwrap();
    assert_eq!(receipt.input_root, input_root);
    assert_eq!(receipt.step_count, 3);

    // Credential checks out, and independently against the raw key.
    assert!(verify_credential(&receipt.credential));
    let key = parse_identifier(&receipt.credential.issuer).unwrap();
    let proof = receipt.credential.proof.as_ref().unwrap();
    let signature: [u8; 64] = hex::decode(&proof.proof_value).unwrap().try_into().unwrap();
    key.verify(
        &receipt.credential.signing_payload().unwrap(),
        &Signature::from_bytes(&signature),
    )
    .unwrap();

    // Output and trace are both retrievable by content id.
    let output: serde_json::Value = fetch_json(harness.content.as_ref(), &receipt.output_cid)
        .await
        .unwrap();
    assert_eq!(output["output"], json!("The report says..."));

    let record = receipt.anchored_record(42, 9, "bafy-report", 1_720_000_000);
    let report = node.verifier().verify(&record).await.unwrap();
    assert!(report.verified);
    assert!(report.input_root_matches);
    assert_eq!(report.record_id, 42);
    assert_eq!(report.step_count, 3);
}

#[tokio::test]
async fn test_exported_trace_reproduces_offline() {
    let store = MemoryContentStore::new();
    let mut recorder = committed("did:key:z6MkOffline");
    let mut rng = rand::thread_rng();
    let steps = rng.gen_range(1..=20);
    for i in 0..steps {
        recorder
            .log_step("tool_call", json!({"call": i, "nonce": rng.gen::<u32>()}))
            .unwrap();
    }
    let exported = recorder.export_trace(&store).await.unwrap();

    // A verifier only sees the stored bytes.
    let bytes = store.fetch(&exported.content_id).await.unwrap();
    let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    for field in ["identifier", "input_commitment", "steps", "step_hashes", "execution_root", "timestamp"] {
        assert!(raw.get(field).is_some(), "exported trace lacks {}", field);
    }
    let trace: ExecutionTrace = serde_json::from_value(raw).unwrap();

    let check = verify_trace(&trace).unwrap();
    assert!(check.verified());

    let tree = HashTree::build(trace.step_hashes.clone());
    assert_eq!(tree.root(), trace.execution_root);
    for (index, leaf) in trace.step_hashes.iter().enumerate() {
        let proof = tree.get_proof(index).unwrap();
        assert_eq!(&proof.leaf, leaf);
        assert!(proof.verify(&trace.execution_root), "step {} of {}", index, steps);
    }
}

#[tokio::test]
async fn test_substituted_trace_fails_anchored_check() {
    let store = Arc::new(MemoryContentStore::new());
    let issuer = CredentialIssuer::new(Arc::new(Identity::generate()));

    let mut honest = committed(issuer.issuer_identifier());
    honest.log_step("prompt", json!("Q")).unwrap();
    honest.log_step("response", json!("A")).unwrap();
    let honest_root = honest.compute_execution_root().unwrap();

    let mut forged = committed(issuer.issuer_identifier());
    forged.log_step("prompt", json!("Q")).unwrap();
    forged.log_step("response", json!("B")).unwrap();
    let forged_export = forged.export_trace(store.as_ref()).await.unwrap();

    let record = provenance_trace::AnchoredRecord {
        record_id: 1,
        nft_token_id: 1,
        input_cid: "bafy-input".to_string(),
        input_root: honest.input_root().unwrap(),
        output_cid: "bafy-output".to_string(),
        execution_root: honest_root,
        trace_cid: forged_export.content_id,
        executor: issuer.issuer_identifier().to_string(),
        timestamp: 1_720_000_000,
    };

    let report = ProvenanceVerifier::new(store).verify(&record).await.unwrap();
    assert!(!report.verified);
    // Inputs were the same; only the execution differs.
    assert!(report.input_root_matches);
    assert_ne!(report.recomputed_root, report.on_chain_root);
}

#[test]
fn test_recorder_reuse_after_reset() {
    let mut recorder = committed("did:key:z6MkReuse");
    recorder.log_step("prompt", json!("Q")).unwrap();
    let first = recorder.finalize().unwrap();

    assert!(recorder.commit_inputs("x", vec![], BTreeMap::new()).is_err());
    recorder.reset();
    assert_eq!(recorder.state(), RunState::Idle);

    let mut metadata = BTreeMap::new();
    metadata.insert("source".to_string(), json!("upload"));
    recorder
        .commit_inputs(
            "bafy-input",
            vec!["first chunk".into(), "second chunk".into()],
            metadata,
        )
        .unwrap();
    recorder.log_step("prompt", json!("Q")).unwrap();
    let second = recorder.finalize().unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_empty_and_single_step_roots() {
    let empty = HashTree::build(Vec::new());
    assert_eq!(empty.root(), digest(b"empty"));
    assert_eq!(empty.root(), Digest::empty_sentinel());

    let mut recorder = committed("did:key:z6MkSingle");
    recorder.log_step("response", json!({"only": true})).unwrap();
    let leaf = recorder.steps()[0].digest().unwrap();
    assert_eq!(recorder.compute_execution_root().unwrap(), leaf);
}
