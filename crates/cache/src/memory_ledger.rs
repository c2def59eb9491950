//! In-memory ledger with failure injection, for tests and local demos.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{CacheResult, LedgerError, LedgerResult};
use crate::event::DocumentUploaded;
use crate::ledger::{EventFilter, LedgerClient, LedgerEvent, TransactionReceipt};

/// Timestamp of block 0.
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
/// Seconds between consecutive blocks.
pub const BLOCK_INTERVAL: u64 = 2;

#[derive(Debug, Default)]
struct LedgerState {
    height: u64,
    next_tx: u64,
    events: Vec<LedgerEvent>,
    receipts: HashMap<String, TransactionReceipt>,
    failing_ranges: Vec<(u64, u64)>,
    fail_receipts: bool,
    fail_height: bool,
    queries: Vec<(u64, u64)>,
}

#[derive(Debug)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    max_block_range: u64,
}

impl MemoryLedger {
    pub fn new(max_block_range: u64) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            max_block_range: max_block_range.max(1),
        }
    }

    /// Timestamp the ledger reports for `height`.
    pub fn timestamp_at(height: u64) -> u64 {
        GENESIS_TIMESTAMP + height * BLOCK_INTERVAL
    }

    /// Moves the head forward. Never lowers it.
    pub fn advance_to(&self, height: u64) {
        let mut state = self.state();
        state.height = state.height.max(height);
    }

    /// Emits `event` from `contract` in a new successful transaction at
    /// `block_height` and returns the transaction reference.
    pub fn emit(&self, contract: &str, event: &DocumentUploaded, block_height: u64) -> CacheResult<String> {
        let log = event.encode(contract)?;
        let mut state = self.state();

        state.next_tx += 1;
        let tx_ref = format!("0x{:064x}", state.next_tx);
        state.height = state.height.max(block_height);
        state.events.push(LedgerEvent {
            block_height,
            tx_ref: tx_ref.clone(),
            log: log.clone(),
        });
        state.receipts.insert(
            tx_ref.clone(),
            TransactionReceipt {
                tx_ref: tx_ref.clone(),
                status: true,
                block_height,
                logs: vec![log],
            },
        );
        Ok(tx_ref)
    }

    /// Rewrites a stored receipt in place. Returns `false` if unknown.
    pub fn tamper_receipt<F>(&self, tx_ref: &str, edit: F) -> bool
    where
        F: FnOnce(&mut TransactionReceipt),
    {
        match self.state().receipts.get_mut(tx_ref) {
            Some(receipt) => {
                edit(receipt);
                true
            }
            None => false,
        }
    }

    pub fn remove_receipt(&self, tx_ref: &str) -> bool {
        self.state().receipts.remove(tx_ref).is_some()
    }

    /// Event queries overlapping `from..=to` fail until cleared.
    pub fn fail_range(&self, from_height: u64, to_height: u64) {
        self.state().failing_ranges.push((from_height, to_height));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_ranges.clear();
        state.fail_receipts = false;
        state.fail_height = false;
    }

    /// Receipt lookups fail at the transport level while set.
    pub fn fail_receipts(&self, fail: bool) {
        self.state().fail_receipts = fail;
    }

    pub fn fail_height(&self, fail: bool) {
        self.state().fail_height = fail;
    }

    /// Ranges of every event query received so far, in order.
    pub fn queries(&self) -> Vec<(u64, u64)> {
        self.state().queries.clone()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn current_height(&self) -> LedgerResult<u64> {
        let state = self.state();
        if state.fail_height {
            return Err(LedgerError::Upstream("head unavailable".to_string()));
        }
        Ok(state.height)
    }

    async fn get_receipt(&self, tx_ref: &str) -> LedgerResult<Option<TransactionReceipt>> {
        let state = self.state();
        if state.fail_receipts {
            return Err(LedgerError::Upstream(format!("receipt lookup failed for {}", tx_ref)));
        }
        Ok(state.receipts.get(tx_ref).cloned())
    }

    async fn query_events(&self, filter: &EventFilter) -> LedgerResult<Vec<LedgerEvent>> {
        if filter.from_height > filter.to_height {
            return Err(LedgerError::InvalidRange {
                from_height: filter.from_height,
                to_height: filter.to_height,
            });
        }
        if filter.span() > self.max_block_range {
            return Err(LedgerError::RangeTooLarge {
                from_height: filter.from_height,
                to_height: filter.to_height,
                max_range: self.max_block_range,
            });
        }

        let mut state = self.state();
        state.queries.push((filter.from_height, filter.to_height));

        let overlaps = state
            .failing_ranges
            .iter()
            .any(|(from, to)| *from <= filter.to_height && filter.from_height <= *to);
        if overlaps {
            return Err(LedgerError::Upstream(format!(
                "query {}..={} failed",
                filter.from_height, filter.to_height
            )));
        }

        Ok(state
            .events
            .iter()
            .filter(|e| e.block_height >= filter.from_height && e.block_height <= filter.to_height)
            .filter(|e| filter.matches(&e.log))
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, height: u64) -> LedgerResult<u64> {
        if height > self.state().height {
            return Err(LedgerError::Upstream(format!("block {} not found", height)));
        }
        Ok(Self::timestamp_at(height))
    }

    fn max_block_range(&self) -> u64 {
        self.max_block_range
    }
}
