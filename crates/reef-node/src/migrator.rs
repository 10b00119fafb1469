//! Range migration: push every local record in a hash range to another node.
//!
//! The source keeps its copy; the receiving node simply gets `set`s. A run
//! is best effort. Records that vanish mid-scan or fail to send are counted
//! and skipped, and nothing is retried.

use std::sync::Arc;

use bytes::Bytes;
use reef_partition::belongs_to_range;
use reef_proto::MemcacheClient;
use reef_store::KvStore;
use tracing::{debug, info, warn};

use crate::directive::MigrationDirective;
use crate::error::NodeError;

/// Opens a [`RecordSink`] to another node. Abstracted so tests can capture
/// pushes.
pub trait Transport: Send + Sync {
    /// Sink delivering records to `host` for the length of one run.
    fn open(&self, host: &str) -> Box<dyn RecordSink>;
}

/// Destination of one migration run. Dropping it releases its connection.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Deliver one record.
    async fn push(&self, key: &[u8], value: Bytes) -> Result<(), NodeError>;
}

/// [`Transport`] over the memcached protocol: one lazily connected client
/// per run.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemcacheTransport;

impl MemcacheTransport {
    /// Transport with no open connections.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for MemcacheTransport {
    fn open(&self, host: &str) -> Box<dyn RecordSink> {
        Box::new(MemcacheClient::new(host))
    }
}

#[async_trait::async_trait]
impl RecordSink for MemcacheClient {
    async fn push(&self, key: &[u8], value: Bytes) -> Result<(), NodeError> {
        self.set(key, &value, true).await?;
        Ok(())
    }
}

/// Counters for one migration run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    /// Keys read from the store's key stream.
    pub scanned: u64,
    /// Keys whose hash fell in the range.
    pub matched: u64,
    /// Records handed to the transport successfully.
    pub forwarded: u64,
    /// Matching keys that were gone by the time their value was read.
    pub skipped_missing: u64,
    /// Matching keys whose read or push failed.
    pub failed: u64,
}

/// Streams the records of a hash range to a destination node.
pub struct RangeMigrator {
    store: Arc<dyn KvStore>,
    transport: Arc<dyn Transport>,
}

impl RangeMigrator {
    /// Migrator reading from `store` and sending through `transport`.
    pub fn new(store: Arc<dyn KvStore>, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    /// Scan the whole keyspace once and forward every record in range.
    ///
    /// Only failing to start the key scan is an error; per-record failures
    /// are counted in the report.
    pub async fn run(&self, directive: &MigrationDirective) -> Result<MigrationReport, NodeError> {
        let mut keys = self
            .store
            .keys()
            .await
            .map_err(|e| NodeError::store("keys", b"", e))?;
        let sink = self.transport.open(&directive.host);
        let mut report = MigrationReport::default();

        while let Some(key) = keys.recv().await {
            report.scanned += 1;
            if !belongs_to_range(&key, &directive.range) {
                continue;
            }
            report.matched += 1;

            let value = match self.store.get(&key).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    report.skipped_missing += 1;
                    continue;
                }
                Err(e) => {
                    debug!(key = %String::from_utf8_lossy(&key), error = %e, "read failed during migration");
                    report.failed += 1;
                    continue;
                }
            };

            match sink.push(&key, value).await {
                Ok(()) => report.forwarded += 1,
                Err(e) => {
                    debug!(
                        key = %String::from_utf8_lossy(&key),
                        host = %directive.host,
                        error = %e,
                        "push failed during migration"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Run a migration in the background.
    ///
    /// The task handle is dropped: nothing awaits, cancels or observes the
    /// run except through its log lines. Concurrent runs do not coordinate.
    pub fn spawn_detached(self: &Arc<Self>, directive: MigrationDirective) {
        let migrator = Arc::clone(self);
        drop(tokio::spawn(async move {
            info!(%directive, "migration started");
            match migrator.run(&directive).await {
                Ok(report) => info!(
                    %directive,
                    scanned = report.scanned,
                    matched = report.matched,
                    forwarded = report.forwarded,
                    skipped_missing = report.skipped_missing,
                    failed = report.failed,
                    "migration finished"
                ),
                Err(e) => warn!(%directive, error = %e, "migration aborted"),
            }
        }));
    }
}
