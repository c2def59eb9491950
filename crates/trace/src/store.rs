//! Content-addressed storage for exported traces.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::error::{TraceError, TraceResult};

/// Content-addressed blob store. Identical bytes yield identical ids.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Stores `bytes` and returns their content id.
    async fn store(&self, bytes: &[u8]) -> TraceResult<String>;

    /// Fetches the bytes stored under `content_id`.
    async fn fetch(&self, content_id: &str) -> TraceResult<Vec<u8>>;
}

/// Stores `value` as canonical JSON.
pub async fn store_json<T>(store: &dyn ContentStore, value: &T) -> TraceResult<String>
where
    T: Serialize + Sync + ?Sized,
{
    let bytes = provenance_core::canonicalize(value)?;
    store.store(&bytes).await
}

pub async fn fetch_json<T: DeserializeOwned>(
    store: &dyn ContentStore,
    content_id: &str,
) -> TraceResult<T> {
    let bytes = store.fetch(content_id).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// In-process store addressing content by its BLAKE3 hash.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content id for `bytes`.
    pub fn content_id(bytes: &[u8]) -> String {
        blake3::hash(bytes).to_hex().to_string()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrites stored content in place, bypassing addressing. Test hook for
    /// simulating a store that serves altered bytes.
    pub fn replace(&self, content_id: &str, bytes: Vec<u8>) -> TraceResult<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|e| TraceError::Store(format!("lock poisoned: {}", e)))?;
        blobs.insert(content_id.to_string(), bytes);
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn store(&self, bytes: &[u8]) -> TraceResult<String> {
        let content_id = Self::content_id(bytes);
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|e| TraceError::Store(format!("lock poisoned: {}", e)))?;
        blobs
            .entry(content_id.clone())
            .or_insert_with(|| bytes.to_vec());
        debug!(content_id = %content_id, size = bytes.len(), "Stored content");
        Ok(content_id)
    }

    async fn fetch(&self, content_id: &str) -> TraceResult<Vec<u8>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|e| TraceError::Store(format!("lock poisoned: {}", e)))?;
        blobs
            .get(content_id)
            .cloned()
            .ok_or_else(|| TraceError::NotFound {
                content_id: content_id.to_string(),
            })
    }
}
