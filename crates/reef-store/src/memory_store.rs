//! In-memory record storage backend.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{KeyStream, KvStore};

/// In-memory record store backed by a `RwLock<HashMap>`.
///
/// Useful for testing and for nodes configured to run in memory-only mode.
/// Nothing survives a restart, so [`sync`](KvStore::sync) is a no-op.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Bytes, Bytes>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        self.check_open()?;
        let map = self.records.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &[u8], value: Bytes) -> Result<(), StoreError> {
        self.check_open()?;
        let mut map = self.records.write().expect("lock poisoned");
        debug!(key_len = key.len(), size = value.len(), "storing record in memory");
        map.insert(Bytes::copy_from_slice(key), value);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        self.check_open()?;
        let mut map = self.records.write().expect("lock poisoned");
        Ok(map.remove(key).is_some())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        self.check_open()?;
        let map = self.records.read().expect("lock poisoned");
        Ok(map.len() as u64)
    }

    async fn keys(&self) -> Result<KeyStream, StoreError> {
        self.check_open()?;
        let keys: Vec<Bytes> = {
            let map = self.records.read().expect("lock poisoned");
            map.keys().cloned().collect()
        };

        let (tx, rx) = mpsc::channel(keys.len().max(1));
        for key in keys {
            // Capacity covers every key, so this never fails while `rx` lives.
            if tx.try_send(key).is_err() {
                break;
            }
        }
        Ok(rx)
    }

    async fn sync(&self) -> Result<(), StoreError> {
        self.check_open()
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }
        debug!("memory store closed");
        Ok(())
    }
}
