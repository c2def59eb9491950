//! Cached mirror of one ledger document event.

use serde::{Deserialize, Serialize};

use provenance_core::Digest;

/// A document upload as recorded on the ledger. Unique per `(owner, record_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Lowercase `0x` address of the uploader.
    pub owner: String,
    pub record_id: u64,
    pub filename: String,
    /// Content id of the document in content-addressed storage.
    pub content_id: String,
    pub content_digest: Digest,
    pub token_id: u64,
    /// Unix seconds of the block that included the upload.
    pub timestamp: u64,
    pub tx_ref: String,
    pub block_height: u64,
}

/// Canonical form of an owner address: trimmed, lowercase.
pub fn normalize_owner(owner: &str) -> String {
    owner.trim().to_ascii_lowercase()
}

/// Sorts newest first. Ties fall back to block height, then record id, so the
/// order is stable across reads.
pub fn sort_by_recency(records: &mut [DocumentRecord]) {
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then(b.block_height.cmp(&a.block_height))
            .then(b.record_id.cmp(&a.record_id))
    });
}
