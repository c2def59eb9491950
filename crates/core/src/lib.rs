//! Core primitives for verifiable execution provenance.
//!
//! This crate holds the pieces every other component depends on:
//!
//! - [`canonical`]: canonical serialization and Keccak-256 digests
//! - [`merkle`]: the duplicate-last binary hash tree with inclusion proofs
//! - [`config`]: file/environment configuration with validation
//! - [`logging`]: `tracing` subscriber setup
//!
//! Two implementations that agree on [`canonical`] and [`merkle`] agree on
//! every input root and execution root.

pub mod canonical;
pub mod config;
pub mod error;
pub mod logging;
pub mod merkle;

pub use canonical::{canonicalize, combine, digest, hash_canonical, Digest, DIGEST_LEN};
pub use config::{CacheConfig, Config, IdentityConfig, LedgerConfig};
pub use error::{CoreError, Result};
pub use merkle::{compute_root, verify_proof, HashTree, MerkleProof, Position, ProofStep};

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
