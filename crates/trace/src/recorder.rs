//! Commitment and trace recorder for a single run.
//!
//! State machine: `Idle → Committed → Logging → Finalized`, back to `Idle`
//! only through [`TraceRecorder::reset`]. Rejected transitions return
//! [`TraceError::InvalidState`] and leave the recorder untouched.
//!
//! All mutating operations take `&mut self` and the recorder is not `Clone`,
//! so one instance can only ever serve one in-flight run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use provenance_core::{unix_now, Digest, HashTree};

use crate::error::{TraceError, TraceResult};
use crate::step::{ExecutionStep, InputCommitment, StepKind};
use crate::store::ContentStore;

/// Source of Unix-second timestamps.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Committed,
    Logging,
    Finalized,
}

/// Exportable record of a run. A verifier needs nothing else to recompute
/// `execution_root` from `step_hashes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub identifier: String,
    pub input_commitment: InputCommitment,
    pub steps: Vec<ExecutionStep>,
    pub step_hashes: Vec<Digest>,
    pub execution_root: Digest,
    pub timestamp: u64,
}

/// Finalized trace together with the content id it was stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedTrace {
    pub content_id: String,
    pub trace: ExecutionTrace,
}

pub struct TraceRecorder {
    identifier: String,
    clock: Clock,
    state: RunState,
    input: Option<InputCommitment>,
    input_root: Option<Digest>,
    steps: Vec<ExecutionStep>,
    finalized: Option<ExecutionTrace>,
}

impl TraceRecorder {
    /// Recorder for runs performed under `identifier`, using wall-clock time.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self::with_clock(identifier, Arc::new(unix_now))
    }

    pub fn with_clock(identifier: impl Into<String>, clock: Clock) -> Self {
        Self {
            identifier: identifier.into(),
            clock,
            state: RunState::Idle,
            input: None,
            input_root: None,
            steps: Vec::new(),
            finalized: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn input_commitment(&self) -> Option<&InputCommitment> {
        self.input.as_ref()
    }

    pub fn input_root(&self) -> Option<Digest> {
        self.input_root
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    /// Commits to the run's inputs and returns the input root.
    pub fn commit_inputs(
        &mut self,
        subject: impl Into<String>,
        chunks: Vec<String>,
        metadata: BTreeMap<String, Value>,
    ) -> TraceResult<Digest> {
        self.require("commit_inputs", &[RunState::Idle])?;

        let commitment = InputCommitment {
            subject: subject.into(),
            chunks,
            metadata,
            timestamp: (self.clock)(),
        };
        let root = commitment.root()?;

        info!(
            identifier = %self.identifier,
            subject = %commitment.subject,
            chunks = commitment.chunks.len(),
            input_root = %root,
            "Inputs committed"
        );

        self.input = Some(commitment);
        self.input_root = Some(root);
        self.state = RunState::Committed;
        Ok(root)
    }

    /// Appends a step and returns its position in the run.
    pub fn log_step(&mut self, kind: impl Into<StepKind>, payload: Value) -> TraceResult<usize> {
        self.require("log_step", &[RunState::Committed, RunState::Logging])?;

        let step = ExecutionStep {
            kind: kind.into(),
            payload,
            timestamp: (self.clock)(),
        };
        debug!(index = self.steps.len(), kind = %step.kind, "Step logged");

        self.steps.push(step);
        self.state = RunState::Logging;
        Ok(self.steps.len() - 1)
    }

    /// Leaf digests in step order.
    pub fn step_digests(&self) -> TraceResult<Vec<Digest>> {
        self.steps.iter().map(ExecutionStep::digest).collect()
    }

    /// Root of the hash tree over the step digests. Does not change state.
    pub fn compute_execution_root(&self) -> TraceResult<Digest> {
        self.require(
            "compute_execution_root",
            &[RunState::Logging, RunState::Finalized],
        )?;
        Ok(HashTree::build(self.step_digests()?).root())
    }

    /// Snapshot of the run as an exportable trace.
    ///
    /// Once finalized, the same trace (including its timestamp) is returned on
    /// every call.
    pub fn get_trace(&self) -> TraceResult<ExecutionTrace> {
        self.require("get_trace", &[RunState::Logging, RunState::Finalized])?;
        if let Some(trace) = &self.finalized {
            return Ok(trace.clone());
        }
        self.build_trace()
    }

    /// Closes the run to further steps and returns its trace.
    pub fn finalize(&mut self) -> TraceResult<ExecutionTrace> {
        self.require("finalize", &[RunState::Logging])?;
        let trace = self.build_trace()?;

        info!(
            identifier = %self.identifier,
            steps = trace.steps.len(),
            execution_root = %trace.execution_root,
            "Run finalized"
        );

        self.finalized = Some(trace.clone());
        self.state = RunState::Finalized;
        Ok(trace)
    }

    /// Finalizes the run if needed and persists the trace to `store`.
    pub async fn export_trace(&mut self, store: &dyn ContentStore) -> TraceResult<ExportedTrace> {
        let trace = match self.state {
            RunState::Logging => self.finalize()?,
            _ => {
                self.require("export_trace", &[RunState::Finalized])?;
                self.get_trace()?
            }
        };

        let content_id = store.store(&provenance_core::canonicalize(&trace)?).await?;
        info!(content_id = %content_id, "Trace exported");
        Ok(ExportedTrace { content_id, trace })
    }

    /// Discards the run and returns to `Idle`.
    pub fn reset(&mut self) {
        self.input = None;
        self.input_root = None;
        self.steps.clear();
        self.finalized = None;
        self.state = RunState::Idle;
    }

    fn build_trace(&self) -> TraceResult<ExecutionTrace> {
        let input_commitment = self.input.clone().ok_or(TraceError::InvalidState {
            operation: "get_trace",
            state: self.state,
        })?;
        let step_hashes = self.step_digests()?;
        let execution_root = HashTree::build(step_hashes.clone()).root();

        Ok(ExecutionTrace {
            identifier: self.identifier.clone(),
            input_commitment,
            steps: self.steps.clone(),
            step_hashes,
            execution_root,
            timestamp: (self.clock)(),
        })
    }

    fn require(&self, operation: &'static str, allowed: &[RunState]) -> TraceResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TraceError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

impl fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceRecorder")
            .field("identifier", &self.identifier)
            .field("state", &self.state)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryContentStore;
    use provenance_core::combine;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    const IDENTIFIER: &str = "did:key:z6MkTestAgent";

    fn fixed_clock(value: u64) -> Clock {
        Arc::new(move || value)
    }

    fn committed() -> TraceRecorder {
        let mut recorder = TraceRecorder::with_clock(IDENTIFIER, fixed_clock(1_700_000_000));
        recorder
            .commit_inputs("bafy-doc", vec!["chunk".into()], BTreeMap::new())
            .unwrap();
        recorder
    }

    #[test]
    fn test_state_transitions() {
        let mut recorder = TraceRecorder::new(IDENTIFIER);
        assert_eq!(recorder.state(), RunState::Idle);

        recorder
            .commit_inputs("doc", vec![], BTreeMap::new())
            .unwrap();
        assert_eq!(recorder.state(), RunState::Committed);

        recorder.log_step("prompt", json!({"text": "Q"})).unwrap();
        assert_eq!(recorder.state(), RunState::Logging);

        recorder.finalize().unwrap();
        assert_eq!(recorder.state(), RunState::Finalized);

        recorder.reset();
        assert_eq!(recorder.state(), RunState::Idle);
        assert!(recorder.steps().is_empty());
        assert!(recorder.input_root().is_none());
    }

    #[test]
    fn test_log_before_commit_rejected() {
        let mut recorder = TraceRecorder::new(IDENTIFIER);
        let err = recorder.log_step("prompt", json!({})).unwrap_err();
        assert!(matches!(
            err,
            TraceError::InvalidState {
                operation: "log_step",
                state: RunState::Idle
            }
        ));
        assert!(recorder.steps().is_empty());
    }

    #[test]
    fn test_double_commit_rejected_without_side_effects() {
        let mut recorder = committed();
        let root = recorder.input_root();

        let err = recorder
            .commit_inputs("other", vec!["x".into()], BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, TraceError::InvalidState { .. }));
        assert_eq!(recorder.input_root(), root);
        assert_eq!(recorder.input_commitment().unwrap().subject, "bafy-doc");
    }

    #[test]
    fn test_root_requires_steps() {
        let recorder = committed();
        assert!(recorder.compute_execution_root().is_err());
        assert!(recorder.get_trace().is_err());
    }

    #[test]
    fn test_log_after_finalize_rejected() {
        let mut recorder = committed();
        recorder.log_step("prompt", json!({"text": "Q"})).unwrap();
        recorder.finalize().unwrap();
        assert!(recorder.log_step("response", json!({})).is_err());
        assert!(recorder.finalize().is_err());
        assert!(recorder.compute_execution_root().is_ok());
    }

    #[test]
    fn test_execution_root_deterministic() {
        let mut recorder = committed();
        for i in 0..7 {
            recorder
                .log_step("tool_call", json!({"tool": "search", "i": i}))
                .unwrap();
        }
        let first = recorder.compute_execution_root().unwrap();
        let second = recorder.compute_execution_root().unwrap();
        assert_eq!(first, second);
        assert_eq!(recorder.state(), RunState::Logging);
    }

    #[test]
    fn test_two_step_root_and_order() {
        let mut forward = committed();
        forward.log_step("prompt", json!("Q")).unwrap();
        forward.log_step("response", json!("A")).unwrap();
        let hashes = forward.step_digests().unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(
            forward.compute_execution_root().unwrap(),
            combine(&hashes[0], &hashes[1])
        );

        let mut reversed = committed();
        reversed.log_step("response", json!("A")).unwrap();
        reversed.log_step("prompt", json!("Q")).unwrap();
        assert_ne!(
            forward.compute_execution_root().unwrap(),
            reversed.compute_execution_root().unwrap()
        );
    }

    #[test]
    fn test_single_step_root_is_step_digest() {
        let mut recorder = committed();
        recorder.log_step("prompt", json!({"text": "only"})).unwrap();
        assert_eq!(
            recorder.compute_execution_root().unwrap(),
            recorder.steps()[0].digest().unwrap()
        );
    }

    #[test]
    fn test_timestamps_from_clock() {
        let ticks = Arc::new(AtomicU64::new(100));
        let source = ticks.clone();
        let clock: Clock = Arc::new(move || source.fetch_add(1, Ordering::SeqCst));

        let mut recorder = TraceRecorder::with_clock(IDENTIFIER, clock);
        recorder.commit_inputs("doc", vec![], BTreeMap::new()).unwrap();
        recorder.log_step("prompt", json!({})).unwrap();
        recorder.log_step("response", json!({})).unwrap();

        assert_eq!(recorder.input_commitment().unwrap().timestamp, 100);
        assert_eq!(recorder.steps()[0].timestamp, 101);
        assert_eq!(recorder.steps()[1].timestamp, 102);
    }

    #[test]
    fn test_trace_contents() {
        let mut recorder = committed();
        recorder.log_step("prompt", json!({"text": "Q"})).unwrap();
        recorder.log_step("response", json!({"text": "A"})).unwrap();

        let trace = recorder.finalize().unwrap();
        assert_eq!(trace.identifier, IDENTIFIER);
        assert_eq!(trace.steps.len(), 2);
        assert_eq!(trace.step_hashes, recorder.step_digests().unwrap());
        assert_eq!(trace.execution_root, recorder.compute_execution_root().unwrap());
        assert_eq!(recorder.get_trace().unwrap(), trace);

        let json = serde_json::to_value(&trace).unwrap();
        for field in [
            "identifier",
            "input_commitment",
            "steps",
            "step_hashes",
            "execution_root",
            "timestamp",
        ] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert!(json["step_hashes"][0].as_str().unwrap().starts_with("0x"));
    }

    #[tokio::test]
    async fn test_export_trace_stores_canonical_json() {
        let store = MemoryContentStore::new();
        let mut recorder = committed();
        recorder.log_step("prompt", json!({"text": "Q"})).unwrap();

        let exported = recorder.export_trace(&store).await.unwrap();
        assert_eq!(recorder.state(), RunState::Finalized);

        let bytes = store.fetch(&exported.content_id).await.unwrap();
        let restored: ExecutionTrace = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(restored, exported.trace);

        // Exporting again yields the same content.
        let again = recorder.export_trace(&store).await.unwrap();
        assert_eq!(again.content_id, exported.content_id);
    }

    #[tokio::test]
    async fn test_export_requires_steps() {
        let store = MemoryContentStore::new();
        let mut recorder = committed();
        assert!(recorder.export_trace(&store).await.is_err());
        assert_eq!(recorder.state(), RunState::Committed);
    }
}
