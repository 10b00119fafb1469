//! [`StoreAdapter`]: the protocol server's view of the local store.

use std::sync::Arc;

use bytes::Bytes;
use reef_proto::CacheBackend;
use reef_store::KvStore;
use tracing::{debug, info, warn};

use crate::directive::{ACK, MigrationDirective};
use crate::error::NodeError;
use crate::migrator::RangeMigrator;

/// Serves memcached requests from a [`KvStore`].
///
/// Every `get` syncs the store before reading. A `get` whose key starts with
/// the directive sentinel never reaches the store: it is handed to
/// [`dispatch_directive`](Self::dispatch_directive).
pub struct StoreAdapter {
    store: Arc<dyn KvStore>,
    migrator: Arc<RangeMigrator>,
}

impl StoreAdapter {
    /// Adapter over `store`, launching migrations with `migrator`.
    pub fn new(store: Arc<dyn KvStore>, migrator: Arc<RangeMigrator>) -> Self {
        Self { store, migrator }
    }

    /// The wrapped store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Handle a sentinel-prefixed key.
    ///
    /// A valid directive starts a detached migration and yields [`ACK`]. A
    /// malformed one is logged and yields `None`, which the client sees as a
    /// plain miss.
    pub fn dispatch_directive(&self, key: &[u8]) -> Option<Bytes> {
        match MigrationDirective::decode(key) {
            Ok(Some(directive)) => {
                info!(%directive, "migration directive accepted");
                self.migrator.spawn_detached(directive);
                Some(Bytes::from_static(ACK))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    key = %String::from_utf8_lossy(key),
                    error = %e,
                    "ignoring malformed migration directive"
                );
                None
            }
        }
    }

    /// Flush and close the store.
    pub async fn close(&self) -> Result<(), NodeError> {
        self.store
            .close()
            .await
            .map_err(|e| NodeError::store("close", b"", e))
    }
}

#[async_trait::async_trait]
impl CacheBackend for StoreAdapter {
    type Error = NodeError;

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, NodeError> {
        self.store
            .sync()
            .await
            .map_err(|e| NodeError::store("sync", key, e))?;

        if MigrationDirective::is_directive(key) {
            return Ok(self.dispatch_directive(key));
        }

        let value = self
            .store
            .get(key)
            .await
            .map_err(|e| NodeError::store("get", key, e))?;
        debug!(
            key = %String::from_utf8_lossy(key),
            size = value.as_ref().map_or(0, Bytes::len),
            hit = value.is_some(),
            "get"
        );
        Ok(value)
    }

    async fn set(&self, key: &[u8], value: Bytes) -> Result<bool, NodeError> {
        self.store
            .set(key, value)
            .await
            .map_err(|e| NodeError::store("set", key, e))?;
        Ok(true)
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, NodeError> {
        self.store
            .delete(key)
            .await
            .map_err(|e| NodeError::store("delete", key, e))
    }

    async fn len(&self) -> Result<u64, NodeError> {
        self.store
            .len()
            .await
            .map_err(|e| NodeError::store("len", b"", e))
    }
}
