//! Validated startup configuration of a node.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reef_store::StoreOptions;

use crate::error::NodeError;
use crate::watchdog::DEFAULT_SAMPLE_INTERVAL;

/// Bytes per megabyte, as used by the `memlimit` setting.
pub const MB: u64 = 1024 * 1024;

/// Which store implementation backs the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// Durable fjall store under [`StoreOptions::path`].
    #[default]
    File,
    /// Volatile in-memory map.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(StoreBackend::File),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(NodeError::Config(format!(
                "unknown store backend {other:?} (expected \"file\" or \"memory\")"
            ))),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreBackend::File => "file",
            StoreBackend::Memory => "memory",
        })
    }
}

/// Everything a node needs to start. Built once and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Interface to bind.
    pub listen: String,
    /// TCP port to bind.
    pub port: u16,
    /// Runtime worker threads.
    pub threads: usize,
    /// Store implementation.
    pub backend: StoreBackend,
    /// Persistent store tuning.
    pub store: StoreOptions,
    /// Memory ceiling in bytes.
    pub memory_limit: u64,
    /// How often the watchdog samples memory.
    pub watchdog_interval: Duration,
    /// File receiving access log lines, if any.
    pub access_log: Option<PathBuf>,
    /// Verbose logging, with access lines on the console.
    pub debug: bool,
}

impl NodeConfig {
    /// `listen:port`, ready for binding.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen, self.port)
    }

    /// Memory ceiling in whole megabytes.
    pub fn memory_limit_mb(&self) -> u64 {
        self.memory_limit / MB
    }

    /// Reject values the node cannot run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.listen.is_empty() {
            return Err(NodeError::Config("listen address is empty".into()));
        }
        if self.threads == 0 {
            return Err(NodeError::Config("threads must be at least 1".into()));
        }
        if self.memory_limit == 0 {
            return Err(NodeError::Config("memory limit must be positive".into()));
        }
        if self.watchdog_interval.is_zero() {
            return Err(NodeError::Config(
                "watchdog interval must be positive".into(),
            ));
        }
        self.store
            .validate()
            .map_err(|e| NodeError::Config(e.to_string()))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: 7900,
            threads: 8,
            backend: StoreBackend::File,
            store: StoreOptions::default(),
            memory_limit: 2048 * MB,
            watchdog_interval: DEFAULT_SAMPLE_INTERVAL,
            access_log: None,
            debug: false,
        }
    }
}
