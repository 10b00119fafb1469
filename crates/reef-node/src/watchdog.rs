//! Memory watchdog: stop the server before the process outgrows its budget.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reef_proto::ShutdownHandle;
use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::MB;

/// Default time between two memory samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of a [`MemoryWatchdog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// Sampling, usage below the threshold.
    Running,
    /// A sample reached the threshold; shutdown is being requested.
    ThresholdExceeded,
    /// Shutdown was requested. Terminal.
    ShuttingDown,
}

/// Source of memory usage readings, in bytes.
pub trait MemorySampler: Send + Sync {
    /// Current usage, or `None` if it could not be read this time.
    fn sample(&self) -> Option<u64>;
}

/// Samples the resident set size of the current process.
pub struct ProcessMemorySampler {
    system: Mutex<System>,
    pid: Pid,
}

impl ProcessMemorySampler {
    /// Sampler for this process.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: Pid::from(std::process::id() as usize),
        }
    }
}

impl Default for ProcessMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn sample(&self) -> Option<u64> {
        let mut system = self.system.lock().expect("lock poisoned");
        if !system.refresh_process(self.pid) {
            return None;
        }
        system.process(self.pid).map(|p| p.memory())
    }
}

/// What the watchdog triggers when the threshold is reached.
pub trait ShutdownHook: Send + Sync {
    /// Begin shutting down. Called at most once per watchdog.
    fn shutdown(&self);
}

impl ShutdownHook for ShutdownHandle {
    fn shutdown(&self) {
        ShutdownHandle::shutdown(self);
    }
}

/// Periodically samples memory and fires a [`ShutdownHook`] once usage
/// reaches the threshold.
pub struct MemoryWatchdog {
    threshold: u64,
    interval: Duration,
    sampler: Arc<dyn MemorySampler>,
    hook: Arc<dyn ShutdownHook>,
    state: WatchdogState,
}

impl MemoryWatchdog {
    /// Watchdog firing `hook` once a sample is `>= threshold` bytes.
    pub fn new(
        threshold: u64,
        sampler: Arc<dyn MemorySampler>,
        hook: Arc<dyn ShutdownHook>,
    ) -> Self {
        Self {
            threshold,
            interval: DEFAULT_SAMPLE_INTERVAL,
            sampler,
            hook,
            state: WatchdogState::Running,
        }
    }

    /// Change the sampling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Current state.
    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Configured threshold in bytes.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Feed one reading through the state machine.
    ///
    /// The hook runs on the transition out of `Running` and never again.
    pub fn observe(&mut self, usage: u64) -> WatchdogState {
        if self.state != WatchdogState::Running || usage < self.threshold {
            return self.state;
        }

        self.state = WatchdogState::ThresholdExceeded;
        warn!(
            observed_mb = usage / MB,
            limit_mb = self.threshold / MB,
            "memory usage over limit, shutting down"
        );
        self.hook.shutdown();
        self.state = WatchdogState::ShuttingDown;
        self.state
    }

    /// Sample until the threshold is reached, then return.
    pub async fn run(mut self) -> WatchdogState {
        info!(
            limit_mb = self.threshold / MB,
            interval_ms = self.interval.as_millis() as u64,
            "memory watchdog started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(usage) = self.sampler.sample() else {
                debug!("memory sample unavailable");
                continue;
            };
            if self.observe(usage) == WatchdogState::ShuttingDown {
                return self.state;
            }
        }
    }

    /// Run on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<WatchdogState> {
        tokio::spawn(self.run())
    }
}
