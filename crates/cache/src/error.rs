//! Error types for the document cache and its ledger collaborator.

use thiserror::Error;

/// Errors raised by a ledger collaborator.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger call itself failed (transport, node error, timeout).
    #[error("Upstream query failed: {0}")]
    Upstream(String),

    #[error("Block range {from_height}..={to_height} exceeds limit of {max_range} blocks")]
    RangeTooLarge {
        from_height: u64,
        to_height: u64,
        max_range: u64,
    },

    #[error("Invalid block range {from_height}..={to_height}")]
    InvalidRange { from_height: u64, to_height: u64 },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur in cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Core error: {0}")]
    Core(#[from] provenance_core::CoreError),

    /// Log data does not follow the expected event layout
    #[error("Event decode error: {0}")]
    Decode(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

pub type CacheResult<T> = Result<T, CacheError>;
