//! Execution provenance: commit to a run's inputs, log its steps, and produce
//! a tamper-evident execution root that a third party can check from the
//! exported trace alone.

pub mod error;
pub mod recorder;
pub mod step;
pub mod store;
pub mod verify;

pub use error::{TraceError, TraceResult};
pub use recorder::{Clock, ExecutionTrace, ExportedTrace, RunState, TraceRecorder};
pub use step::{ExecutionStep, InputCommitment, StepKind};
pub use store::{fetch_json, store_json, ContentStore, MemoryContentStore};
pub use verify::{verify_trace, AnchoredRecord, ProvenanceReport, ProvenanceVerifier, TraceVerification};
