//! Logging setup for the reef daemon.
//!
//! Two streams share one `tracing` subscriber:
//!
//! 1. **Console**: everything at the configured level (`RUST_LOG` wins),
//!    except access lines unless `debug` is on.
//! 2. **Access log**: events on [`ACCESS_LOG_TARGET`], appended to a file
//!    when one is configured.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use reef_proto::ACCESS_LOG_TARGET;
use tracing::Level;
use tracing_subscriber::filter::{EnvFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

/// What to log and where.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig<'a> {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: &'a str,
    /// Append access lines to this file.
    pub access_log: Option<&'a Path>,
    /// Lower the level to `debug` and echo access lines on the console.
    pub debug: bool,
}

/// Initialize the tracing subscriber.
///
/// Call this once at startup, before any `tracing` events are emitted.
pub fn init(config: &TelemetryConfig<'_>) -> anyhow::Result<()> {
    let access_file = match config.access_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open access log {}", path.display()))?;
            Some(file)
        }
        None => None,
    };

    let console_filter = console_filter(config)?;
    let console = fmt::layer().with_filter(console_filter);

    let access = access_file.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
            .with_filter(Targets::new().with_target(ACCESS_LOG_TARGET, Level::INFO))
    });

    tracing_subscriber::registry()
        .with(console)
        .with(access)
        .try_init()
        .context("tracing subscriber already installed")?;
    Ok(())
}

/// Console-only subscriber, for short-lived subcommands.
pub fn init_console(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn console_filter(config: &TelemetryConfig<'_>) -> anyhow::Result<EnvFilter> {
    let level = if config.debug { "debug" } else { config.level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if config.debug && config.access_log.is_none() {
        return Ok(filter);
    }
    let silence_access = format!("{ACCESS_LOG_TARGET}=off")
        .parse()
        .context("invalid access log directive")?;
    Ok(filter.add_directive(silence_access))
}
