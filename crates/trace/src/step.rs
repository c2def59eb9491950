//! Records that make up one run: the input commitment and the execution steps.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use provenance_core::{hash_canonical, Digest};

use crate::error::TraceResult;

/// Kind of an execution step. Open-ended: unknown kinds are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    Prompt,
    ToolCall,
    Response,
    Other(String),
}

impl StepKind {
    pub fn as_str(&self) -> &str {
        match self {
            StepKind::Prompt => "prompt",
            StepKind::ToolCall => "tool_call",
            StepKind::Response => "response",
            StepKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for StepKind {
    fn from(kind: &str) -> Self {
        match kind {
            "prompt" => StepKind::Prompt,
            "tool_call" => StepKind::ToolCall,
            "response" => StepKind::Response,
            other => StepKind::Other(other.to_string()),
        }
    }
}

impl From<String> for StepKind {
    fn from(kind: String) -> Self {
        StepKind::from(kind.as_str())
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logged step. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub kind: StepKind,
    pub payload: Value,
    /// Unix seconds, assigned by the recorder.
    pub timestamp: u64,
}

impl ExecutionStep {
    /// Leaf digest of this step in the execution tree.
    pub fn digest(&self) -> TraceResult<Digest> {
        Ok(hash_canonical(self)?)
    }
}

/// Binding to the inputs of a run, made before the first step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputCommitment {
    /// What the run is about, e.g. a document's content id.
    pub subject: String,
    pub chunks: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: u64,
}

impl InputCommitment {
    /// The input root: digest of the canonical commitment.
    pub fn root(&self) -> TraceResult<Digest> {
        Ok(hash_canonical(self)?)
    }
}
