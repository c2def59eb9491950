//! Error types for trace recording, export and verification.

use thiserror::Error;

use crate::recorder::RunState;

#[derive(Debug, Error)]
pub enum TraceError {
    /// Operation not allowed in the recorder's current state. Nothing was changed.
    #[error("{operation} not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: RunState,
    },

    #[error("Core error: {0}")]
    Core(#[from] provenance_core::CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Content-addressed store failure
    #[error("Content store error: {0}")]
    Store(String),

    #[error("Content not found: {content_id}")]
    NotFound { content_id: String },
}

pub type TraceResult<T> = Result<T, TraceError>;
