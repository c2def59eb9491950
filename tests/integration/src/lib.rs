//! Cross-crate integration tests
//!
//! This test suite validates:
//! - A full run: commit, log, finalize, export, credential, anchored verification
//! - Root reproducibility from an exported trace alone
//! - Cache sync, tamper detection and purge through the node context
//! - Cursor behavior when ledger windows fail

pub mod test_utils;

#[cfg(test)]
mod provenance_flow_tests;

#[cfg(test)]
mod cache_integrity_tests;
