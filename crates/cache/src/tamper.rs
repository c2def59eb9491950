//! Probabilistic re-verification of cached records against the ledger.
//!
//! A random sample of an owner's cached records is checked against the
//! transaction receipts they claim to come from. One mismatch discards the
//! whole owner cache: there is no per-record signature chain to repair from.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::CacheResult;
use crate::event::{document_uploaded_topic, DocumentUploaded};
use crate::ledger::LedgerClient;
use crate::record::{normalize_owner, DocumentRecord};
use crate::store::CacheStore;

/// Outcome of re-deriving one record from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TamperFinding {
    Verified,
    /// The ledger could not be asked; says nothing about the record.
    Inconclusive(String),
    Mismatch(String),
}

impl TamperFinding {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, TamperFinding::Mismatch(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCheck {
    pub record_id: u64,
    pub tx_ref: String,
    pub finding: TamperFinding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperReport {
    pub owner: String,
    pub cached: usize,
    pub checks: Vec<SampleCheck>,
    /// Records removed by the purge, if one happened.
    pub purged: Option<usize>,
}

impl TamperReport {
    pub fn tampered(&self) -> bool {
        self.checks.iter().any(|c| c.finding.is_mismatch())
    }
}

/// `ceil(len × fraction)`, clamped to `[1, len]`. Zero for an empty cache.
pub fn sample_size(len: usize, fraction: f64) -> usize {
    if len == 0 {
        return 0;
    }
    let wanted = (len as f64 * fraction).ceil();
    if wanted.is_nan() || wanted < 1.0 {
        1
    } else if wanted >= len as f64 {
        len
    } else {
        wanted as usize
    }
}

pub struct TamperDetector {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<CacheStore>,
    contract_address: String,
    sample_fraction: f64,
}

impl TamperDetector {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<CacheStore>,
        contract_address: impl Into<String>,
        sample_fraction: f64,
    ) -> Self {
        Self {
            ledger,
            store,
            contract_address: contract_address.into(),
            sample_fraction,
        }
    }

    /// Checks a random sample of `records` (all belonging to `owner`) and
    /// purges the owner's cache if any sampled record does not match.
    pub async fn inspect(&self, owner: &str, records: &[DocumentRecord]) -> CacheResult<TamperReport> {
        let owner = normalize_owner(owner);
        let count = sample_size(records.len(), self.sample_fraction);
        let sample: Vec<DocumentRecord> = {
            let mut rng = rand::thread_rng();
            records.choose_multiple(&mut rng, count).cloned().collect()
        };

        let mut checks = Vec::with_capacity(sample.len());
        for record in &sample {
            let finding = self.check_record(record).await;
            match &finding {
                TamperFinding::Verified => {
                    debug!(owner = %owner, record_id = record.record_id, "Cached record verified");
                }
                TamperFinding::Inconclusive(reason) => {
                    warn!(
                        owner = %owner,
                        record_id = record.record_id,
                        reason = %reason,
                        "Cached record could not be checked"
                    );
                }
                TamperFinding::Mismatch(reason) => {
                    error!(
                        owner = %owner,
                        record_id = record.record_id,
                        tx_ref = %record.tx_ref,
                        reason = %reason,
                        "Cached record does not match ledger"
                    );
                }
            }
            let mismatch = finding.is_mismatch();
            checks.push(SampleCheck {
                record_id: record.record_id,
                tx_ref: record.tx_ref.clone(),
                finding,
            });
            if mismatch {
                break;
            }
        }

        let mut report = TamperReport {
            owner,
            cached: records.len(),
            checks,
            purged: None,
        };
        if report.tampered() {
            report.purged = Some(self.store.purge(&report.owner)?);
        }
        Ok(report)
    }

    /// Re-derives `record` from its transaction receipt.
    pub async fn check_record(&self, record: &DocumentRecord) -> TamperFinding {
        let receipt = match self.ledger.get_receipt(&record.tx_ref).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => return TamperFinding::Mismatch("transaction not found".to_string()),
            Err(e) => return TamperFinding::Inconclusive(e.to_string()),
        };

        if !receipt.status {
            return TamperFinding::Mismatch("transaction failed".to_string());
        }
        if receipt.block_height != record.block_height {
            return TamperFinding::Mismatch(format!(
                "block height {} cached, {} on ledger",
                record.block_height, receipt.block_height
            ));
        }

        let signature = document_uploaded_topic();
        let event = receipt
            .logs
            .iter()
            .filter(|log| log.address.eq_ignore_ascii_case(&self.contract_address))
            .filter(|log| log.topics.first() == Some(&signature))
            .filter_map(|log| DocumentUploaded::decode(log).ok())
            .find(|ev| ev.document_id == record.record_id);
        let event = match event {
            Some(event) => event,
            None => return TamperFinding::Mismatch("document event not found in receipt".to_string()),
        };

        let mut differences = Vec::new();
        if event.content_id != record.content_id {
            differences.push("content_id");
        }
        if event.content_digest != record.content_digest {
            differences.push("content_digest");
        }
        if event.filename != record.filename {
            differences.push("filename");
        }
        if normalize_owner(&event.uploader) != normalize_owner(&record.owner) {
            differences.push("owner");
        }
        if event.token_id != record.token_id {
            differences.push("token_id");
        }

        if differences.is_empty() {
            TamperFinding::Verified
        } else {
            TamperFinding::Mismatch(format!("fields differ: {}", differences.join(", ")))
        }
    }
}

impl std::fmt::Debug for TamperDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TamperDetector")
            .field("contract_address", &self.contract_address)
            .field("sample_fraction", &self.sample_fraction)
            .finish_non_exhaustive()
    }
}
