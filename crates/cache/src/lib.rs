//! Local mirror of ledger document events.
//!
//! - [`store`]: SQLite cache of records and per-owner sync cursors
//! - [`ledger`]: the ledger collaborator contract
//! - [`event`]: `DocumentUploaded` log codec
//! - [`sync`]: windowed incremental sync
//! - [`tamper`]: sampled re-verification with purge on mismatch
//! - [`index`]: the per-owner read path tying them together

pub mod error;
pub mod event;
pub mod index;
pub mod ledger;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory_ledger;
pub mod record;
pub mod store;
pub mod sync;
pub mod tamper;

pub use error::{CacheError, CacheResult, LedgerError, LedgerResult};
pub use event::{document_uploaded_topic, DocumentUploaded, DOCUMENT_UPLOADED_SIGNATURE};
pub use index::{DocumentIndex, ListOutcome};
pub use ledger::{address_topic, uint_topic, EventFilter, LedgerClient, LedgerEvent, LedgerLog, TransactionReceipt};
#[cfg(any(test, feature = "test-utils"))]
pub use memory_ledger::MemoryLedger;
pub use record::{normalize_owner, DocumentRecord};
pub use store::{CacheStats, CacheStore};
pub use sync::{BlockWindow, SyncEngine, SyncReport};
pub use tamper::{sample_size, SampleCheck, TamperDetector, TamperFinding, TamperReport};
