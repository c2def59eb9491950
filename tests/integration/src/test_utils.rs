//! Test utilities shared by the integration suites

use provenance_cache::{CacheStore, DocumentUploaded, MemoryLedger};
use provenance_core::{digest, CacheConfig, Config, IdentityConfig, LedgerConfig};
use provenance_identity::Identity;
use provenance_node::NodeContext;
use provenance_trace::{Clock, MemoryContentStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Address of the document contract on the test ledger
pub const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

/// Deterministic owner address ending in `n`
pub fn owner(n: u8) -> String {
    format!("0x{:040x}", n)
}

/// Clock that always reports `timestamp`
pub fn fixed_clock(timestamp: u64) -> Clock {
    Arc::new(move || timestamp)
}

/// Upload event for `document_id` by `uploader`
pub fn upload(document_id: u64, uploader: &str) -> DocumentUploaded {
    DocumentUploaded {
        document_id,
        uploader: uploader.to_string(),
        token_id: 1,
        content_id: format!("bafybeig{:08}", document_id),
        content_digest: digest(format!("document body {}", document_id).as_bytes()),
        filename: format!("document-{}.pdf", document_id),
    }
}

/// Scratch directory unique to one test
pub fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}_{}", prefix, uuid::Uuid::new_v4()))
}

/// Node context over an in-memory ledger and content store, with an on-disk
/// cache and key file in a scratch directory.
pub struct TestNode {
    pub node: NodeContext,
    pub ledger: Arc<MemoryLedger>,
    pub content: Arc<MemoryContentStore>,
    pub dir: PathBuf,
}

impl TestNode {
    pub fn new(sample_fraction: f64, max_block_range: u64) -> Self {
        provenance_core::logging::try_init();

        let dir = temp_dir("provenance_node");
        let key_path = dir.join("agent.jwk");
        Identity::generate().save_to_file(&key_path).unwrap();

        let config = Config {
            identity: IdentityConfig {
                key_path: Some(key_path),
            },
            ledger: LedgerConfig {
                contract_address: CONTRACT.to_string(),
                deployment_height: 0,
                max_block_range,
            },
            cache: CacheConfig {
                db_path: dir.join("cache").join("documents.db"),
                sample_fraction,
            },
        };

        let ledger = Arc::new(MemoryLedger::new(max_block_range));
        let content = Arc::new(MemoryContentStore::new());
        let node = NodeContext::from_config(config, ledger.clone(), content.clone()).unwrap();

        Self {
            node,
            ledger,
            content,
            dir,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        self.node.documents().store()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}
