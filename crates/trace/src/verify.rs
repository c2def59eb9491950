//! Third-party verification of exported traces.
//!
//! A verifier never re-runs the computation. It recomputes the execution root
//! from the digests carried in the trace and compares it with the root that
//! was anchored on the ledger.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use provenance_core::{compute_root, Digest};

use crate::error::TraceResult;
use crate::recorder::ExecutionTrace;
use crate::step::ExecutionStep;
use crate::store::{fetch_json, ContentStore};

/// Outcome of checking a trace against itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceVerification {
    /// Root recomputed from `step_hashes`.
    pub recomputed_root: Digest,
    /// `recomputed_root == execution_root`
    pub root_matches: bool,
    /// Every step re-hashes to its entry in `step_hashes`.
    pub steps_match: bool,
}

impl TraceVerification {
    pub fn verified(&self) -> bool {
        self.root_matches && self.steps_match
    }
}

/// Recomputes a trace's root from its step digests and re-derives each digest
/// from the step it belongs to.
pub fn verify_trace(trace: &ExecutionTrace) -> TraceResult<TraceVerification> {
    let recomputed_root = compute_root(&trace.step_hashes);

    let derived = trace
        .steps
        .iter()
        .map(ExecutionStep::digest)
        .collect::<TraceResult<Vec<_>>>()?;
    let steps_match = derived == trace.step_hashes;

    Ok(TraceVerification {
        recomputed_root,
        root_matches: recomputed_root == trace.execution_root,
        steps_match,
    })
}

/// Provenance record as anchored on the ledger for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchoredRecord {
    pub record_id: u64,
    pub nft_token_id: u64,
    pub input_cid: String,
    pub input_root: Digest,
    pub output_cid: String,
    pub execution_root: Digest,
    pub trace_cid: String,
    /// Identifier of the executing identity.
    pub executor: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceReport {
    pub record_id: u64,
    pub on_chain_root: Digest,
    pub recomputed_root: Digest,
    /// Recomputed root equals both the anchored root and the trace's own
    /// `execution_root`, and every step re-hashes to its digest.
    pub verified: bool,
    pub input_root_matches: bool,
    pub trace_cid: String,
    pub step_count: usize,
}

/// Checks anchored records against traces held in a content store.
#[derive(Clone)]
pub struct ProvenanceVerifier {
    store: Arc<dyn ContentStore>,
}

impl ProvenanceVerifier {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Fetches the trace named by `record.trace_cid` and compares its
    /// recomputed root with the anchored one.
    ///
    /// A trace that cannot be fetched or parsed is an error; a trace that
    /// disagrees with the record is a report with `verified == false`.
    pub async fn verify(&self, record: &AnchoredRecord) -> TraceResult<ProvenanceReport> {
        let trace: ExecutionTrace = fetch_json(self.store.as_ref(), &record.trace_cid).await?;
        let check = verify_trace(&trace)?;
        let input_root_matches = trace.input_commitment.root()? == record.input_root;
        let verified = check.verified() && check.recomputed_root == record.execution_root;

        if verified {
            info!(
                record_id = record.record_id,
                execution_root = %record.execution_root,
                "Provenance verified"
            );
        } else {
            warn!(
                record_id = record.record_id,
                on_chain_root = %record.execution_root,
                recomputed_root = %check.recomputed_root,
                root_matches = check.root_matches,
                steps_match = check.steps_match,
                "Provenance mismatch"
            );
        }

        Ok(ProvenanceReport {
            record_id: record.record_id,
            on_chain_root: record.execution_root,
            recomputed_root: check.recomputed_root,
            verified,
            input_root_matches,
            trace_cid: record.trace_cid.clone(),
            step_count: trace.steps.len(),
        })
    }
}

impl std::fmt::Debug for ProvenanceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvenanceVerifier").finish_non_exhaustive()
    }
}
