//! The storage interface a [`MemcacheServer`](crate::MemcacheServer) drives.

use bytes::Bytes;

/// A key/value backend served over the memcached protocol.
///
/// The server calls these from many connection tasks concurrently;
/// implementations provide their own synchronization.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Error returned by backend operations, rendered as `SERVER_ERROR`.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Look up a key. `None` is a miss.
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, Self::Error>;

    /// Store a value. Returns `false` if the backend declined to store it.
    async fn set(&self, key: &[u8], value: Bytes) -> Result<bool, Self::Error>;

    /// Delete a key. Returns `false` if it did not exist.
    async fn delete(&self, key: &[u8]) -> Result<bool, Self::Error>;

    /// Number of items held.
    async fn len(&self) -> Result<u64, Self::Error>;
}
