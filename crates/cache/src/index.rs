//! Read path for an owner's documents: verify the cache, sync it, serve it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use provenance_core::{CacheConfig, LedgerConfig};

use crate::error::{CacheError, CacheResult};
use crate::ledger::LedgerClient;
use crate::record::{normalize_owner, sort_by_recency, DocumentRecord};
use crate::store::CacheStore;
use crate::sync::{SyncEngine, SyncReport};
use crate::tamper::{TamperDetector, TamperReport};

/// Result of one read pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOutcome {
    pub owner: String,
    /// Newest first, one entry per record id.
    pub documents: Vec<DocumentRecord>,
    /// Present when the cache was non-empty and got sampled.
    pub tamper: Option<TamperReport>,
    /// Absent when the pass stopped after a purge or the ledger head was
    /// unreachable.
    pub sync: Option<SyncReport>,
}

impl ListOutcome {
    pub fn purged(&self) -> bool {
        self.tamper.as_ref().map(|t| t.purged.is_some()).unwrap_or(false)
    }
}

/// Serves owner document lists with at most one pass per owner in flight.
pub struct DocumentIndex {
    store: Arc<CacheStore>,
    sync: SyncEngine,
    detector: TamperDetector,
    owner_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DocumentIndex {
    pub fn new(
        store: Arc<CacheStore>,
        ledger: Arc<dyn LedgerClient>,
        ledger_config: &LedgerConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        let sync = SyncEngine::new(ledger.clone(), store.clone(), ledger_config);
        let detector = TamperDetector::new(
            ledger,
            store.clone(),
            ledger_config.contract_address.clone(),
            cache_config.sample_fraction,
        );
        Self {
            store,
            sync,
            detector,
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Lists `owner`'s documents.
    ///
    /// A non-empty cache is sampled first. On a mismatch the owner's cache is
    /// purged and the pass returns no documents; the next pass resyncs from
    /// the deployment height. An unreachable ledger head serves the cache
    /// as-is.
    pub async fn list(&self, owner: &str) -> CacheResult<ListOutcome> {
        let owner = normalize_owner(owner);
        let lock = self.owner_lock(&owner)?;
        let outcome = {
            let _pass = lock.lock().await;
            self.list_locked(owner.clone()).await
        };
        self.release_lock(&owner, lock);
        outcome
    }

    async fn list_locked(&self, owner: String) -> CacheResult<ListOutcome> {
        let cached = self.store.get(&owner)?;

        let tamper = if cached.is_empty() {
            None
        } else {
            Some(self.detector.inspect(&owner, &cached).await?)
        };
        if let Some(report) = &tamper {
            if report.purged.is_some() {
                warn!(owner = %owner, "Cache purged after failed verification");
                return Ok(ListOutcome {
                    owner,
                    documents: Vec::new(),
                    tamper,
                    sync: None,
                });
            }
        }

        let sync = match self.sync.sync_owner(&owner).await {
            Ok(report) => Some(report),
            Err(CacheError::Ledger(e)) => {
                warn!(owner = %owner, error = %e, "Ledger unavailable, serving cache");
                None
            }
            Err(e) => return Err(e),
        };

        let mut seen = HashSet::new();
        let discovered = sync.iter().flat_map(|s| s.discovered.iter().cloned());
        let mut documents: Vec<DocumentRecord> = cached
            .into_iter()
            .chain(discovered)
            .filter(|record| seen.insert(record.record_id))
            .collect();
        sort_by_recency(&mut documents);

        info!(owner = %owner, count = documents.len(), "Listed documents");
        Ok(ListOutcome {
            owner,
            documents,
            tamper,
            sync,
        })
    }

    fn owner_lock(&self, owner: &str) -> CacheResult<Arc<AsyncMutex<()>>> {
        let mut locks = self.owner_locks.lock().map_err(|_| CacheError::LockPoisoned)?;
        Ok(locks
            .entry(owner.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    /// Drops the owner's lock entry once no other pass holds or awaits it.
    fn release_lock(&self, owner: &str, lock: Arc<AsyncMutex<()>>) {
        drop(lock);
        let Ok(mut locks) = self.owner_locks.lock() else {
            return;
        };
        if locks.get(owner).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(owner);
        }
    }

    #[cfg(test)]
    fn tracked_owners(&self) -> usize {
        self.owner_locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for DocumentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIndex")
            .field("store", &self.store)
            .field("sync", &self.sync)
            .field("detector", &self.detector)
            .finish_non_exhaustive()
    }
}
