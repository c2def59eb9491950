//! Explicit context object wiring identity, tracing, credentials and the
//! document cache for one node.
//!
//! Everything a handler needs is reached through [`NodeContext`]; there is no
//! process-global identity or ledger client.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use provenance_cache::{CacheError, CacheStore, DocumentIndex, LedgerClient};
use provenance_core::{Config, CoreError, Digest};
use provenance_identity::{CredentialIssuer, Identity, IdentityError, VerifiableCredential};
use provenance_trace::{
    store_json, AnchoredRecord, ContentStore, ProvenanceVerifier, TraceError, TraceRecorder,
};

/// Credential type issued for a finished run.
pub const EXECUTION_CREDENTIAL_TYPE: &str = "ExecutionCredential";

#[derive(Debug, Error)]
pub enum NodeError {
    /// Missing or invalid configuration. The node must not start.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Core error: {0}")]
    Core(CoreError),
}

impl From<CoreError> for NodeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Configuration(msg) => NodeError::Configuration(msg),
            other => NodeError::Core(other),
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;

/// What a finished run leaves behind: the two roots, where the trace and
/// output live, and the signed credential binding them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReceipt {
    pub input_root: Digest,
    pub execution_root: Digest,
    pub trace_cid: String,
    pub output_cid: String,
    pub step_count: usize,
    pub credential: VerifiableCredential,
}

impl RunReceipt {
    /// The record to anchor on the ledger for this run.
    pub fn anchored_record(
        &self,
        record_id: u64,
        nft_token_id: u64,
        input_cid: &str,
        timestamp: u64,
    ) -> AnchoredRecord {
        AnchoredRecord {
            record_id,
            nft_token_id,
            input_cid: input_cid.to_string(),
            input_root: self.input_root,
            output_cid: self.output_cid.clone(),
            execution_root: self.execution_root,
            trace_cid: self.trace_cid.clone(),
            executor: self.credential.issuer.clone(),
            timestamp,
        }
    }
}

pub struct NodeContext {
    config: Config,
    identity: Arc<Identity>,
    issuer: CredentialIssuer,
    content_store: Arc<dyn ContentStore>,
    verifier: ProvenanceVerifier,
    documents: DocumentIndex,
}

impl NodeContext {
    /// Builds a context from already-constructed collaborators.
    pub fn new(
        config: Config,
        identity: Arc<Identity>,
        ledger: Arc<dyn LedgerClient>,
        content_store: Arc<dyn ContentStore>,
        cache: Arc<CacheStore>,
    ) -> NodeResult<Self> {
        config.validate()?;

        let documents = DocumentIndex::new(cache, ledger, &config.ledger, &config.cache);
        let issuer = CredentialIssuer::new(identity.clone());
        let verifier = ProvenanceVerifier::new(content_store.clone());

        info!(
            identifier = %identity.identifier(),
            contract = %config.ledger.contract_address,
            "Node context ready"
        );

        Ok(Self {
            config,
            identity,
            issuer,
            content_store,
            verifier,
            documents,
        })
    }

    /// Loads the identity and opens the cache named by `config`.
    ///
    /// A missing key path or key file is a configuration error.
    pub fn from_config(
        config: Config,
        ledger: Arc<dyn LedgerClient>,
        content_store: Arc<dyn ContentStore>,
    ) -> NodeResult<Self> {
        config.validate()?;

        let key_path = config
            .identity
            .key_path
            .as_ref()
            .ok_or_else(|| NodeError::Configuration("identity.key_path is not set".to_string()))?;
        let identity = Identity::load_from_file(key_path).map_err(|e| match e {
            IdentityError::Config(msg) => NodeError::Configuration(msg),
            other => NodeError::Identity(other),
        })?;
        let cache = CacheStore::open(&config.cache.db_path)?;

        Self::new(
            config,
            Arc::new(identity),
            ledger,
            content_store,
            Arc::new(cache),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn issuer(&self) -> &CredentialIssuer {
        &self.issuer
    }

    pub fn content_store(&self) -> &Arc<dyn ContentStore> {
        &self.content_store
    }

    pub fn verifier(&self) -> &ProvenanceVerifier {
        &self.verifier
    }

    pub fn documents(&self) -> &DocumentIndex {
        &self.documents
    }

    /// A fresh recorder for one run under this node's identity.
    pub fn begin_run(&self) -> TraceRecorder {
        TraceRecorder::new(self.identity.identifier())
    }

    /// Finalizes the run, stores its trace and `output`, and issues the
    /// execution credential.
    pub async fn finish_run(&self, mut recorder: TraceRecorder, output: &Value) -> NodeResult<RunReceipt> {
        let exported = recorder.export_trace(self.content_store.as_ref()).await?;
        let output_cid = store_json(self.content_store.as_ref(), output).await?;

        let trace = exported.trace;
        let input_root = trace.input_commitment.root()?;
        let subject = json!({
            "id": self.identity.identifier(),
            "inputRoot": input_root,
            "executionRoot": trace.execution_root,
            "traceCID": exported.content_id,
            "outputCID": output_cid,
            "stepCount": trace.steps.len(),
        });
        let credential = self.issuer.issue(&subject, EXECUTION_CREDENTIAL_TYPE)?;

        info!(
            execution_root = %trace.execution_root,
            trace_cid = %exported.content_id,
            output_cid = %output_cid,
            "Run finished"
        );

        Ok(RunReceipt {
            input_root,
            execution_root: trace.execution_root,
            trace_cid: exported.content_id,
            output_cid,
            step_count: trace.steps.len(),
            credential,
        })
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("identity", &self.identity)
            .field("documents", &self.documents)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provenance_cache::MemoryLedger;
    use provenance_core::{CacheConfig, IdentityConfig, LedgerConfig};
    use provenance_identity::verify_credential;
    use provenance_trace::MemoryContentStore;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn config(key_path: Option<PathBuf>, db_path: PathBuf) -> Config {
        Config {
            identity: IdentityConfig { key_path },
            ledger: LedgerConfig {
                contract_address: "0x1111111111111111111111111111111111111111".to_string(),
                deployment_height: 0,
                max_block_range: 100,
            },
            cache: CacheConfig {
                db_path,
                sample_fraction: 0.5,
            },
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("node_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_missing_key_path_is_configuration_error() {
        let dir = temp_dir();
        let result = NodeContext::from_config(
            config(None, dir.join("cache.db")),
            Arc::new(MemoryLedger::new(100)),
            Arc::new(MemoryContentStore::new()),
        );
        assert!(matches!(result, Err(NodeError::Configuration(_))));
    }

    #[test]
    fn test_missing_key_file_is_configuration_error() {
        let dir = temp_dir();
        let result = NodeContext::from_config(
            config(Some(dir.join("absent.jwk")), dir.join("cache.db")),
            Arc::new(MemoryLedger::new(100)),
            Arc::new(MemoryContentStore::new()),
        );
        assert!(matches!(result, Err(NodeError::Configuration(_))));
    }

    #[test]
    fn test_missing_contract_is_configuration_error() {
        let mut cfg = config(None, PathBuf::from("unused.db"));
        cfg.ledger.contract_address.clear();
        let result = NodeContext::new(
            cfg,
            Arc::new(Identity::generate()),
            Arc::new(MemoryLedger::new(100)),
            Arc::new(MemoryContentStore::new()),
            Arc::new(CacheStore::in_memory().unwrap()),
        );
        assert!(matches!(result, Err(NodeError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_run_produces_verifiable_receipt() {
        let dir = temp_dir();
        let key_path = dir.join("agent.jwk");
        let identity = Identity::generate();
        identity.save_to_file(&key_path).unwrap();

        let node = NodeContext::from_config(
            config(Some(key_path), dir.join("cache.db")),
            Arc::new(MemoryLedger::new(100)),
            Arc::new(MemoryContentStore::new()),
        )
        .unwrap();
        assert_eq!(node.identity().identifier(), identity.identifier());

        let mut run = node.begin_run();
        run.commit_inputs("bafy-doc", vec!["text".into()], BTreeMap::new())
            .unwrap();
        run.log_step("prompt", json!({"text": "Summarize"})).unwrap();
        run.log_step("response", json!({"text": "Summary"})).unwrap();
        let expected_root = run.compute_execution_root().unwrap();

        let receipt = node
            .finish_run(run, &json!({"output": "Summary"}))
            .await
            .unwrap();
        assert_eq!(receipt.execution_root, expected_root);
        assert_eq!(receipt.step_count, 2);
        assert!(verify_credential(&receipt.credential));
        assert_eq!(
            receipt.credential.credential_subject["executionRoot"],
            json!(expected_root.to_hex())
        );

        let record = receipt.anchored_record(1, 7, "bafy-doc", 1_700_000_000);
        let report = node.verifier().verify(&record).await.unwrap();
        assert!(report.verified);
        assert!(report.input_root_matches);

        std::fs::remove_dir_all(dir).ok();
    }
}
