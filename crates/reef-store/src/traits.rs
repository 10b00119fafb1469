//! Core trait for record storage.

use bytes::Bytes;

use crate::error::StoreError;

/// Buffer size of a [`KeyStream`] channel.
pub const KEY_STREAM_CAPACITY: usize = 1024;

/// A lazy, finite, one-shot stream of every key in a store.
///
/// Keys are produced in the background while the receiver is consumed.
/// Dropping the receiver stops the producer. Writes that race with the scan
/// may or may not be observed.
pub type KeyStream = tokio::sync::mpsc::Receiver<Bytes>;

/// Trait for storing and retrieving records.
///
/// All implementations must be `Send + Sync`: the protocol server calls into
/// the store from many connection tasks at once, and the store provides its
/// own internal concurrency control.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Retrieve a value by key. Returns `None` if not found.
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;

    /// Insert or overwrite a record.
    async fn set(&self, key: &[u8], value: Bytes) -> Result<(), StoreError>;

    /// Delete a record. Returns `true` if the key existed.
    async fn delete(&self, key: &[u8]) -> Result<bool, StoreError>;

    /// Number of records currently stored.
    async fn len(&self) -> Result<u64, StoreError>;

    /// Start a stream over every key currently stored.
    async fn keys(&self) -> Result<KeyStream, StoreError>;

    /// Force buffered writes to stable storage.
    async fn sync(&self) -> Result<(), StoreError>;

    /// Flush and release the store. Later operations fail with
    /// [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError>;
}
