//! The core of a reef node.
//!
//! A node serves memcached traffic from a local store and takes part in
//! rebalancing and self-protection:
//!
//! - [`StoreAdapter`]: bridges the protocol server to a [`KvStore`] and
//!   intercepts migration directives smuggled through `get`.
//! - [`MigrationDirective`]: the `@#$<host>-<left>-<right>` control key.
//! - [`RangeMigrator`]: streams every local record whose key hash falls in
//!   a range to another node.
//! - [`MemoryWatchdog`]: shuts the server down when process memory crosses
//!   the configured ceiling.
//! - [`NodeConfig`]: validated startup configuration.
//!
//! [`KvStore`]: reef_store::KvStore

pub mod adapter;
pub mod config;
pub mod directive;
pub mod error;
pub mod migrator;
pub mod watchdog;

pub use adapter::StoreAdapter;
pub use config::{MB, NodeConfig, StoreBackend};
pub use directive::{ACK, MigrationDirective, SENTINEL};
pub use error::{DirectiveError, NodeError};
pub use migrator::{MemcacheTransport, MigrationReport, RangeMigrator, RecordSink, Transport};
pub use watchdog::{
    DEFAULT_SAMPLE_INTERVAL, MemorySampler, MemoryWatchdog, ProcessMemorySampler, ShutdownHook,
    WatchdogState,
};
