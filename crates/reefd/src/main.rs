//! `reefd`: the reef cache node daemon.
//!
//! Serves the memcached text protocol from a local store, hands hash ranges
//! to other nodes on request, and shuts itself down when its memory use
//! crosses the configured limit.
//!
//! # Usage
//!
//! ```text
//! reefd start                                   # defaults: 0.0.0.0:7900, ./testdb
//! reefd start -c reef.toml                      # with a config file
//! reefd start --port 7901 --dbpath ./node2      # second instance
//! reefd start --memory --debug                  # in-memory, access lines on stdout
//! reefd migrate --node 10.0.0.1:7900 --to 10.0.0.2:7900 --left 0 --right 1073741824
//! ```

mod config;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reef_node::{
    MemcacheTransport, MemoryWatchdog, MigrationDirective, NodeConfig, ProcessMemorySampler,
    RangeMigrator, StoreAdapter, StoreBackend,
};
use reef_partition::KeyRange;
use reef_proto::{MemcacheClient, MemcacheServer, ShutdownHandle};
use reef_store::{FjallStore, KvStore, MemoryStore};
use tracing::{error, info};

use config::CliConfig;
use telemetry::TelemetryConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "reefd", version, about = "reef memcached-compatible cache node")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node.
    Start(StartArgs),

    /// Ask a node to copy a hash range to another node.
    Migrate {
        /// Node holding the records (`host:port`).
        #[arg(long)]
        node: String,

        /// Node receiving the records (`host:port`).
        #[arg(long)]
        to: String,

        /// Lower hash bound (inclusive).
        #[arg(long)]
        left: u32,

        /// Upper hash bound (exclusive). Below `left` means the range wraps.
        #[arg(long)]
        right: u32,
    },
}

/// Overrides for the config file. Unset flags keep the file's values.
#[derive(Args, Debug, Default)]
struct StartArgs {
    /// Address to listen on.
    #[arg(long)]
    listen: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Database directory.
    #[arg(long)]
    dbpath: Option<PathBuf>,

    /// Journal size limit in bytes.
    #[arg(long)]
    fsz: Option<u64>,

    /// Merge window, `HH_HH`.
    #[arg(long)]
    window: Option<String>,

    /// Merge trigger, in (0, 1].
    #[arg(long)]
    trigger: Option<f64>,

    /// Runtime worker threads.
    #[arg(long)]
    threads: Option<usize>,

    /// Memory limit in MB.
    #[arg(long)]
    memlimit: Option<u64>,

    /// Access log file.
    #[arg(long)]
    accesslog: Option<PathBuf>,

    /// Debug logging, access lines on stdout.
    #[arg(long)]
    debug: bool,

    /// Keep records in memory only.
    #[arg(short, long)]
    memory: bool,
}

impl StartArgs {
    /// CLI args override config file values.
    fn apply(self, config: &mut CliConfig) {
        if let Some(listen) = self.listen {
            config.node.listen = listen;
        }
        if let Some(port) = self.port {
            config.node.port = port;
        }
        if let Some(threads) = self.threads {
            config.node.threads = threads;
        }
        if let Some(path) = self.dbpath {
            config.store.path = path;
        }
        if let Some(fsz) = self.fsz {
            config.store.max_file_size = fsz;
        }
        if let Some(window) = self.window {
            config.store.merge_window = window;
        }
        if let Some(trigger) = self.trigger {
            config.store.merge_trigger = trigger;
        }
        if let Some(memlimit) = self.memlimit {
            config.limits.memlimit_mb = memlimit;
        }
        if let Some(path) = self.accesslog {
            config.log.access_log = Some(path);
        }
        if self.debug {
            config.log.debug = true;
        }
        if self.memory {
            config.store.backend = "memory".to_string();
        }
    }
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut file_config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Start(args) => {
            args.apply(&mut file_config);
            let level = file_config.log.level.clone();
            let config = file_config.into_node_config()?;

            telemetry::init(&TelemetryConfig {
                level: &level,
                access_log: config.access_log.as_deref(),
                debug: config.debug,
            })?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(config.threads)
                .thread_name("reefd-worker")
                .enable_all()
                .build()
                .context("failed to build runtime")?;

            let result = runtime.block_on(cmd_start(&config));
            if let Err(e) = &result {
                error!(error = %format!("{e:#}"), "reefd failed");
            }
            result
        }
        Commands::Migrate {
            node,
            to,
            left,
            right,
        } => {
            telemetry::init_console(&file_config.log.level);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to build runtime")?;
            let directive = MigrationDirective::new(to, KeyRange::new(left, right));
            runtime.block_on(cmd_migrate(&node, &directive))
        }
    }
}

// -----------------------------------------------------------------------
// reefd start
// -----------------------------------------------------------------------

/// A node whose store is open and whose listener is bound.
struct Node {
    server: MemcacheServer<StoreAdapter>,
    adapter: Arc<StoreAdapter>,
    addr: SocketAddr,
}

/// Open the store and bind the listener. Either failing is fatal.
async fn open_node(config: &NodeConfig) -> Result<Node> {
    let store: Arc<dyn KvStore> = match config.backend {
        StoreBackend::File => Arc::new(
            FjallStore::open(config.store.clone()).with_context(|| {
                format!("failed to open store at {}", config.store.path.display())
            })?,
        ),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };

    let migrator = Arc::new(RangeMigrator::new(
        store.clone(),
        Arc::new(MemcacheTransport::new()),
    ));
    let adapter = Arc::new(StoreAdapter::new(store, migrator));

    let mut server = MemcacheServer::new(adapter.clone());
    let addr = server
        .listen(config.listen_addr())
        .await
        .with_context(|| format!("failed to listen on {}", config.listen_addr()))?;

    Ok(Node {
        server,
        adapter,
        addr,
    })
}

/// Serve until shutdown, then release the store.
async fn run_node(node: Node, config: &NodeConfig) -> Result<()> {
    let Node {
        mut server, adapter, ..
    } = node;
    let shutdown = server.shutdown_handle();

    let watchdog = MemoryWatchdog::new(
        config.memory_limit,
        Arc::new(ProcessMemorySampler::new()),
        Arc::new(shutdown.clone()),
    )
    .with_interval(config.watchdog_interval)
    .spawn();
    let interrupt = spawn_interrupt_handler(shutdown);

    let served = server.serve().await.context("server failed");

    watchdog.abort();
    interrupt.abort();
    adapter.close().await.context("failed to close store")?;
    served?;

    info!("shut down gracefully");
    Ok(())
}

async fn cmd_start(config: &NodeConfig) -> Result<()> {
    info!(
        addr = %config.listen_addr(),
        backend = %config.backend,
        path = %config.store.path.display(),
        threads = config.threads,
        memlimit_mb = config.memory_limit_mb(),
        "starting reefd"
    );
    let node = open_node(config).await?;
    info!(addr = %node.addr, "node ready");
    run_node(node, config).await
}

fn spawn_interrupt_handler(shutdown: ShutdownHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            shutdown.shutdown();
        }
    })
}

// -----------------------------------------------------------------------
// reefd migrate
// -----------------------------------------------------------------------

async fn cmd_migrate(node: &str, directive: &MigrationDirective) -> Result<()> {
    let client = MemcacheClient::new(node);
    let reply = client
        .get(&directive.encode())
        .await
        .with_context(|| format!("failed to reach {node}"))?;
    match reply {
        Some(ack) if ack.as_ref() == reef_node::ACK => {
            println!("{node} accepted migration of {directive}");
            Ok(())
        }
        Some(other) => anyhow::bail!(
            "{node} answered {:?} instead of an acknowledgment",
            String::from_utf8_lossy(&other)
        ),
        None => anyhow::bail!("{node} rejected the migration directive"),
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
