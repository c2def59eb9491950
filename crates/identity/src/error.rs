//! Error types for identity and credential operations.

use thiserror::Error;

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Key material missing or unusable. The identity cannot be constructed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed key material
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Identifier not in the expected `did:key` form
    #[error("Invalid identifier {identifier}: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// Canonicalization of a signed payload failed
    #[error("Core error: {0}")]
    Core(#[from] provenance_core::CoreError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
