//! Shared test harness for reef integration tests.
//!
//! Provides [`TestNode`]: a real node (store, adapter, memcached server)
//! listening on an ephemeral loopback port, wired the same way `reefd` wires
//! a production node.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reef_node::{MemcacheTransport, RangeMigrator, StoreAdapter};
use reef_partition::key_hash;
use reef_proto::{CacheBackend, MemcacheClient, MemcacheServer, ProtoError, ShutdownHandle};
use reef_store::{FjallStore, KvStore, MemoryStore, StoreOptions};
use tokio::task::JoinHandle;

/// How long helpers wait for asynchronous effects before failing a test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// A running node on `127.0.0.1:<ephemeral>`.
pub struct TestNode {
    /// Address clients connect to.
    pub addr: SocketAddr,
    /// Stops the node's server.
    pub shutdown: ShutdownHandle,
    store: Arc<dyn KvStore>,
    adapter: Arc<StoreAdapter>,
    serve: JoinHandle<Result<(), ProtoError>>,
    _dir: Option<tempfile::TempDir>,
}

impl TestNode {
    /// Node backed by an in-memory store.
    pub async fn start() -> Self {
        Self::start_with_store(Arc::new(MemoryStore::new()), None).await
    }

    /// Node backed by a fjall store in a fresh temporary directory.
    pub async fn start_fjall() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = FjallStore::open(StoreOptions::new(dir.path().join("db"))).unwrap();
        Self::start_with_store(Arc::new(store), Some(dir)).await
    }

    async fn start_with_store(store: Arc<dyn KvStore>, dir: Option<tempfile::TempDir>) -> Self {
        let migrator = Arc::new(RangeMigrator::new(
            store.clone(),
            Arc::new(MemcacheTransport::new()),
        ));
        let adapter = Arc::new(StoreAdapter::new(store.clone(), migrator));

        let mut server = MemcacheServer::new(adapter.clone());
        let addr = server.listen("127.0.0.1:0").await.unwrap();
        let shutdown = server.shutdown_handle();
        let serve = tokio::spawn(async move { server.serve().await });

        Self {
            addr,
            shutdown,
            store,
            adapter,
            serve,
            _dir: dir,
        }
    }

    /// `host:port` of this node, as used in migration directives.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// A fresh client connected to this node.
    pub fn client(&self) -> MemcacheClient {
        MemcacheClient::new(self.host())
    }

    /// The node's store, for checking contents without going over the wire.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Number of records held.
    pub async fn len(&self) -> u64 {
        self.adapter.len().await.unwrap()
    }

    /// Whether the server task has returned.
    pub fn is_stopped(&self) -> bool {
        self.serve.is_finished()
    }

    /// Wait for the server to return (after [`ShutdownHandle::shutdown`]).
    pub async fn wait_stopped(self) {
        tokio::time::timeout(WAIT_TIMEOUT, self.serve)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        self.adapter.close().await.unwrap();
    }

    /// Shut down and wait for the server to return.
    pub async fn stop(self) {
        self.shutdown.shutdown();
        self.wait_stopped().await;
    }
}

/// Write `n` records `key-<i>` → `value-<i>` through the wire protocol and
/// return every key with its hash.
pub async fn seed(node: &TestNode, n: usize) -> BTreeMap<String, u32> {
    let client = node.client();
    let mut hashes = BTreeMap::new();
    for i in 0..n {
        let key = format!("key-{i:04}");
        assert!(
            client
                .set(key.as_bytes(), format!("value-{i}").as_bytes(), false)
                .await
                .unwrap()
        );
        hashes.insert(key.clone(), key_hash(key.as_bytes()));
    }
    hashes
}

/// Keys of `hashes` whose hash satisfies `pred`, sorted.
pub fn keys_where(hashes: &BTreeMap<String, u32>, pred: impl Fn(u32) -> bool) -> Vec<String> {
    hashes
        .iter()
        .filter(|(_, h)| pred(**h))
        .map(|(k, _)| k.clone())
        .collect()
}

/// All keys currently in `store`, sorted.
pub async fn stored_keys(store: &Arc<dyn KvStore>) -> Vec<String> {
    let mut stream = store.keys().await.unwrap();
    let mut keys = Vec::new();
    while let Some(key) = stream.recv().await {
        keys.push(String::from_utf8(key.to_vec()).unwrap());
    }
    keys.sort();
    keys
}

/// Poll until `node` holds exactly `n` records.
pub async fn wait_for_len(node: &TestNode, n: u64) {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while node.len().await != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("node never reached {n} records"));
}

/// Send a directive `get` and return the raw reply value.
pub async fn send_directive(node: &TestNode, key: &[u8]) -> Option<Bytes> {
    node.client().get(key).await.unwrap()
}
