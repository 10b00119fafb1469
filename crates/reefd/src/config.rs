//! TOML configuration for the reef daemon.
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! node on `0.0.0.0:7900`. Command-line flags are applied on top before the
//! result is frozen into a [`NodeConfig`].

use std::path::{Path, PathBuf};

use anyhow::Context;
use reef_node::{MB, NodeConfig, StoreBackend};
use reef_store::{MergeWindow, StoreOptions};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Listening address and runtime size.
    pub node: NodeSection,
    /// Record store.
    pub store: StoreSection,
    /// Resource ceilings.
    pub limits: LimitsSection,
    /// Logging.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Interface to bind.
    pub listen: String,
    /// TCP port.
    pub port: u16,
    /// Runtime worker threads.
    pub threads: usize,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: 7900,
            threads: 8,
        }
    }
}

/// `[store]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Backend type: `"file"` (default) or `"memory"`.
    pub backend: String,
    /// Database directory.
    pub path: PathBuf,
    /// Journal size limit in bytes.
    pub max_file_size: u64,
    /// Preferred merge hours, `"HH_HH"`.
    pub merge_window: String,
    /// Stale-data fraction that triggers a merge, in `(0, 1]`.
    pub merge_trigger: f64,
}

impl Default for StoreSection {
    fn default() -> Self {
        let defaults = StoreOptions::default();
        Self {
            backend: "file".to_string(),
            path: defaults.path,
            max_file_size: defaults.max_file_size,
            merge_window: defaults.merge_window.to_string(),
            merge_trigger: defaults.merge_trigger,
        }
    }
}

/// `[limits]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Memory ceiling in megabytes. Crossing it shuts the node down.
    pub memlimit_mb: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self { memlimit_mb: 2048 }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
    /// Append access lines to this file.
    pub access_log: Option<PathBuf>,
    /// Debug logging, access lines on the console.
    pub debug: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            access_log: None,
            debug: false,
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)
                    .with_context(|| format!("failed to parse {}", p.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Validate and freeze into the node's configuration.
    pub fn into_node_config(self) -> anyhow::Result<NodeConfig> {
        let merge_window: MergeWindow = self
            .store
            .merge_window
            .parse()
            .context("invalid store.merge_window")?;
        let backend: StoreBackend = self.store.backend.parse()?;

        let config = NodeConfig {
            listen: self.node.listen,
            port: self.node.port,
            threads: self.node.threads,
            backend,
            store: StoreOptions {
                path: self.store.path,
                max_file_size: self.store.max_file_size,
                merge_window,
                merge_trigger: self.store.merge_trigger,
            },
            memory_limit: self.limits.memlimit_mb.saturating_mul(MB),
            access_log: self.log.access_log,
            debug: self.log.debug,
            ..NodeConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
