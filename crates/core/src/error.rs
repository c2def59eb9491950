//! Core error types

use thiserror::Error;

/// Core error type shared by the hashing, tree and configuration layers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing or invalid configuration. Fatal at construction time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Value could not be brought into canonical form
    #[error("Canonicalization failed: {0}")]
    Canonicalization(#[from] serde_json::Error),

    /// Malformed hex digest
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Proof requested for a leaf that does not exist
    #[error("Leaf index {index} out of range (tree has {leaf_count} leaves)")]
    IndexOutOfRange { index: usize, leaf_count: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
