//! Contract of the ledger collaborator consumed by sync and tamper detection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use provenance_core::Digest;

use crate::error::{CacheError, CacheResult, LedgerResult};

/// One log entry emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLog {
    /// Emitting contract address.
    pub address: String,
    /// `topics[0]` is the event signature; the rest are indexed arguments.
    pub topics: Vec<Digest>,
    /// ABI-encoded non-indexed arguments.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_ref: String,
    /// `true` when the transaction executed successfully.
    pub status: bool,
    pub block_height: u64,
    pub logs: Vec<LedgerLog>,
}

/// A log returned by an event query, with its position on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub block_height: u64,
    pub tx_ref: String,
    pub log: LedgerLog,
}

/// Event query over an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub address: String,
    pub signature: Digest,
    pub from_height: u64,
    pub to_height: u64,
    /// Filters on indexed arguments: `topics[i]` constrains `log.topics[i + 1]`.
    /// `None` matches anything.
    pub topics: Vec<Option<Digest>>,
}

impl EventFilter {
    /// Whether `log` satisfies this filter's address, signature and topics.
    pub fn matches(&self, log: &LedgerLog) -> bool {
        if !log.address.eq_ignore_ascii_case(&self.address) {
            return false;
        }
        if log.topics.first() != Some(&self.signature) {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, wanted)| match wanted {
            Some(topic) => log.topics.get(i + 1) == Some(topic),
            None => true,
        })
    }

    /// Number of blocks covered by the filter.
    pub fn span(&self) -> u64 {
        self.to_height.saturating_sub(self.from_height) + 1
    }
}

/// Read access to the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Height of the latest block.
    async fn current_height(&self) -> LedgerResult<u64>;

    /// Receipt of a transaction, `None` if the ledger does not know it.
    async fn get_receipt(&self, tx_ref: &str) -> LedgerResult<Option<TransactionReceipt>>;

    /// Logs matching `filter`. Spans wider than [`max_block_range`] fail with
    /// `RangeTooLarge`.
    ///
    /// [`max_block_range`]: LedgerClient::max_block_range
    async fn query_events(&self, filter: &EventFilter) -> LedgerResult<Vec<LedgerEvent>>;

    /// Unix-seconds timestamp of the block at `height`.
    async fn block_timestamp(&self, height: u64) -> LedgerResult<u64>;

    /// Largest block span a single event query may cover.
    fn max_block_range(&self) -> u64;
}

/// Indexed-argument topic for an address: 20 bytes left-padded to 32.
pub fn address_topic(address: &str) -> CacheResult<Digest> {
    let bytes = parse_address(address)?;
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(Digest::from_bytes(word))
}

/// Indexed-argument topic for an unsigned integer.
pub fn uint_topic(value: u64) -> Digest {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    Digest::from_bytes(word)
}

/// Parses a `0x`-prefixed 20-byte address.
pub fn parse_address(address: &str) -> CacheResult<[u8; 20]> {
    let trimmed = address.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| CacheError::InvalidAddress(address.to_string()))?;
    let bytes = hex::decode(hex_part).map_err(|_| CacheError::InvalidAddress(address.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CacheError::InvalidAddress(address.to_string()))
}
