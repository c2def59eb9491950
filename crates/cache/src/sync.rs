//! Incremental sync of one owner's documents from the ledger.
//!
//! Each pass scans `[cursor + 1, head]` (or `[deployment_height, head]` for an
//! owner never synced) in windows no wider than the ledger allows. Discovered
//! events are upserted; the cursor advances to the end of the last window
//! that succeeded before the first failed one, so a failed window is scanned
//! again on the next pass.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use provenance_core::{Digest, LedgerConfig};

use crate::error::CacheResult;
use crate::event::{document_uploaded_topic, DocumentUploaded};
use crate::ledger::{address_topic, EventFilter, LedgerClient};
use crate::record::{normalize_owner, DocumentRecord};
use crate::store::CacheStore;

/// Inclusive block range of one event query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWindow {
    pub from_height: u64,
    pub to_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub owner: String,
    /// Ledger head observed at the start of the pass.
    pub head: u64,
    /// Windows scanned, in order. Empty when already up to date.
    pub windows: Vec<BlockWindow>,
    pub failed_windows: Vec<BlockWindow>,
    /// Records decoded from the ledger during this pass.
    pub discovered: Vec<DocumentRecord>,
    /// How many of `discovered` were not cached before.
    pub inserted: usize,
    /// Cursor after the pass.
    pub cursor: Option<u64>,
}

impl SyncReport {
    pub fn complete(&self) -> bool {
        self.failed_windows.is_empty()
    }
}

pub struct SyncEngine {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<CacheStore>,
    contract_address: String,
    deployment_height: u64,
    window: u64,
}

impl SyncEngine {
    /// The window size is the smaller of the configured range and the
    /// ledger's own limit.
    pub fn new(ledger: Arc<dyn LedgerClient>, store: Arc<CacheStore>, config: &LedgerConfig) -> Self {
        let window = config.max_block_range.min(ledger.max_block_range()).max(1);
        Self {
            ledger,
            store,
            contract_address: config.contract_address.clone(),
            deployment_height: config.deployment_height,
            window,
        }
    }

    pub fn window_size(&self) -> u64 {
        self.window
    }

    /// Splits `[from, to]` into consecutive windows of at most `size` blocks.
    pub fn windows(from_height: u64, to_height: u64, size: u64) -> Vec<BlockWindow> {
        let size = size.max(1);
        let mut windows = Vec::new();
        let mut start = from_height;
        while start <= to_height {
            let end = start.saturating_add(size - 1).min(to_height);
            windows.push(BlockWindow {
                from_height: start,
                to_height: end,
            });
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        windows
    }

    /// Runs one sync pass for `owner`.
    ///
    /// Failing to read the ledger head aborts the pass with an error; failing
    /// windows are logged and recorded in the report.
    pub async fn sync_owner(&self, owner: &str) -> CacheResult<SyncReport> {
        let owner = normalize_owner(owner);
        let owner_topic = address_topic(&owner)?;
        let cursor = self.store.get_cursor(&owner)?;
        let head = self.ledger.current_height().await?;

        let start = match cursor {
            Some(height) => height.saturating_add(1),
            None => self.deployment_height,
        };
        let windows = if start <= head {
            Self::windows(start, head, self.window)
        } else {
            Vec::new()
        };

        let mut discovered = Vec::new();
        let mut failed_windows = Vec::new();
        let mut advance_to = None;

        for window in &windows {
            match self.scan_window(window, &owner, owner_topic).await {
                Ok(mut records) => {
                    debug!(
                        owner = %owner,
                        from = window.from_height,
                        to = window.to_height,
                        found = records.len(),
                        "Scanned window"
                    );
                    discovered.append(&mut records);
                    if failed_windows.is_empty() {
                        advance_to = Some(window.to_height);
                    }
                }
                Err(e) => {
                    warn!(
                        owner = %owner,
                        from = window.from_height,
                        to = window.to_height,
                        error = %e,
                        "Window query failed, will retry on next pass"
                    );
                    failed_windows.push(*window);
                }
            }
        }

        let inserted = self.store.upsert_batch(&discovered)?;
        if let Some(height) = advance_to {
            self.store.set_cursor(&owner, height)?;
        }
        let cursor = self.store.get_cursor(&owner)?;

        if !windows.is_empty() {
            info!(
                owner = %owner,
                head = head,
                windows = windows.len(),
                failed = failed_windows.len(),
                discovered = discovered.len(),
                inserted = inserted,
                cursor = ?cursor,
                "Sync pass finished"
            );
        }

        Ok(SyncReport {
            owner,
            head,
            windows,
            failed_windows,
            discovered,
            inserted,
            cursor,
        })
    }

    async fn scan_window(
        &self,
        window: &BlockWindow,
        owner: &str,
        owner_topic: Digest,
    ) -> CacheResult<Vec<DocumentRecord>> {
        let filter = EventFilter {
            address: self.contract_address.clone(),
            signature: document_uploaded_topic(),
            from_height: window.from_height,
            to_height: window.to_height,
            topics: vec![None, Some(owner_topic)],
        };
        let events = self.ledger.query_events(&filter).await?;

        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        let mut records = Vec::with_capacity(events.len());
        for event in events {
            let decoded = match DocumentUploaded::decode(&event.log) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(tx_ref = %event.tx_ref, error = %e, "Skipping undecodable event");
                    continue;
                }
            };
            if normalize_owner(&decoded.uploader) != owner {
                continue;
            }

            let timestamp = match timestamps.get(&event.block_height) {
                Some(ts) => *ts,
                None => {
                    let ts = self.ledger.block_timestamp(event.block_height).await?;
                    timestamps.insert(event.block_height, ts);
                    ts
                }
            };
            records.push(decoded.into_record(&event.tx_ref, event.block_height, timestamp));
        }
        Ok(records)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("contract_address", &self.contract_address)
            .field("deployment_height", &self.deployment_height)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
