//! [`FjallStore`]: durable record storage wrapping a Fjall keyspace.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::options::StoreOptions;
use crate::traits::{KEY_STREAM_CAPACITY, KeyStream, KvStore};

type Result<T> = std::result::Result<T, StoreError>;

/// Record store backed by Fjall.
///
/// Fjall is a log-structured engine: writes land in a journal and memtable,
/// and are flushed and compacted in the background. Reads see every
/// acknowledged write; [`sync`](KvStore::sync) additionally fsyncs the journal.
pub struct FjallStore {
    db: Database,
    /// key → value.
    records: Keyspace,
    options: StoreOptions,
    closed: AtomicBool,
    /// Backing directory of a temporary store, removed on drop.
    _tmp: Option<tempfile::TempDir>,
}

impl FjallStore {
    /// Open (or create) a persistent store.
    pub fn open(options: StoreOptions) -> Result<Self> {
        options.validate()?;
        let db = Database::builder(&options.path)
            .max_journaling_size(options.max_file_size)
            .open()?;
        let store = Self::init(db, options, None)?;
        info!(
            path = %store.options.path.display(),
            max_file_size = store.options.max_file_size,
            merge_window = %store.options.merge_window,
            merge_trigger = store.options.merge_trigger,
            in_merge_window = store.options.merge_window.contains_now(),
            "opened fjall store"
        );
        Ok(store)
    }

    /// Open a temporary store that is removed on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        let options = StoreOptions::new(tmp.path());
        Self::init(db, options, Some(tmp))
    }

    fn init(
        db: Database,
        options: StoreOptions,
        tmp: Option<tempfile::TempDir>,
    ) -> Result<Self> {
        let records = db.keyspace("records", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            records,
            options,
            closed: AtomicBool::new(false),
            _tmp: tmp,
        })
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

/// Run a blocking fjall call (fsync, full scan) on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(std::io::Error::other)?
}

#[async_trait::async_trait]
impl KvStore for FjallStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.check_open()?;
        Ok(self
            .records
            .get(key)?
            .map(|value| Bytes::copy_from_slice(&value)))
    }

    async fn set(&self, key: &[u8], value: Bytes) -> Result<()> {
        self.check_open()?;
        self.records.insert(key, value.as_ref())?;
        debug!(key_len = key.len(), size = value.len(), "stored record");
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<bool> {
        self.check_open()?;
        if self.records.get(key)?.is_none() {
            return Ok(false);
        }
        self.records.remove(key)?;
        debug!(key_len = key.len(), "deleted record");
        Ok(true)
    }

    /// Note: this is an O(n) scan.
    async fn len(&self) -> Result<u64> {
        self.check_open()?;
        let records = self.records.clone();
        run_blocking(move || {
            let mut count = 0;
            for guard in records.iter() {
                let _ = guard.key()?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }

    async fn keys(&self) -> Result<KeyStream> {
        self.check_open()?;
        let records = self.records.clone();
        let (tx, rx) = mpsc::channel(KEY_STREAM_CAPACITY);

        // Fjall iteration is blocking; walk the keyspace off the async workers.
        tokio::task::spawn_blocking(move || {
            let mut sent = 0u64;
            for guard in records.iter() {
                let key = match guard.key() {
                    Ok(key) => Bytes::copy_from_slice(&key),
                    Err(e) => {
                        warn!(error = %e, sent, "key scan aborted");
                        return;
                    }
                };
                if tx.blocking_send(key).is_err() {
                    debug!(sent, "key scan receiver dropped");
                    return;
                }
                sent += 1;
            }
            debug!(sent, "key scan complete");
        });

        Ok(rx)
    }

    async fn sync(&self) -> Result<()> {
        self.check_open()?;
        let db = self.db.clone();
        run_blocking(move || Ok(db.persist(PersistMode::SyncAll)?)).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }
        let db = self.db.clone();
        run_blocking(move || Ok(db.persist(PersistMode::SyncAll)?)).await?;
        info!(path = %self.options.path.display(), "fjall store closed");
        Ok(())
    }
}
