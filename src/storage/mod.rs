//! Object storage interface
//!
//! The harvester only ever uploads whole objects under a key. Listing and
//! reading back exist for the local catalog and for tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;

pub mod local;

pub use local::LocalObjectStore;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Key is empty, absolute or escapes the store root
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// Object does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Keyed object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing any existing object
    async fn put(&self, key: &str, body: Bytes) -> StorageResult<()>;

    /// Read an object
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Reject keys that could escape a store root
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// In-process object store
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes) -> StorageResult<()> {
        validate_key(key)?;
        self.objects
            .lock()
            .map_err(|e| StorageError::IoError(e.to_string()))?
            .insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .lock()
            .map_err(|e| StorageError::IoError(e.to_string()))?
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .map_err(|e| StorageError::IoError(e.to_string()))?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
