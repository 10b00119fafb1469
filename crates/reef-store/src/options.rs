//! Tuning knobs for the persistent backend.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StoreError;

/// Hours of the day during which background merging is preferred.
///
/// Written as `"HH_HH"` (e.g. `"00_23"`). A window whose start is after its
/// end wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeWindow {
    /// First hour of the window (inclusive).
    pub start: u8,
    /// Last hour of the window (inclusive).
    pub end: u8,
}

impl MergeWindow {
    /// Whether the given hour of day (0-23) falls inside the window.
    pub fn contains(&self, hour: u8) -> bool {
        if self.start <= self.end {
            self.start <= hour && hour <= self.end
        } else {
            hour >= self.start || hour <= self.end
        }
    }

    /// Whether the current UTC hour falls inside the window.
    pub fn contains_now(&self) -> bool {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.contains(((secs / 3600) % 24) as u8)
    }
}

impl Default for MergeWindow {
    fn default() -> Self {
        Self { start: 0, end: 23 }
    }
}

impl FromStr for MergeWindow {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidMergeWindow(s.to_string());
        let (start, end) = s.trim().split_once('_').ok_or_else(invalid)?;
        let parse_hour = |h: &str| {
            h.parse::<u8>()
                .ok()
                .filter(|h| *h <= 23)
                .ok_or_else(invalid)
        };
        Ok(Self {
            start: parse_hour(start)?,
            end: parse_hour(end)?,
        })
    }
}

impl fmt::Display for MergeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}_{:02}", self.start, self.end)
    }
}

/// Options for opening a [`FjallStore`](crate::FjallStore).
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    /// Directory holding the database.
    pub path: PathBuf,
    /// Upper bound, in bytes, on the write-ahead journal before it is rotated.
    pub max_file_size: u64,
    /// Hours during which merging is preferred.
    pub merge_window: MergeWindow,
    /// Fraction of stale data that makes a merge worthwhile.
    pub merge_trigger: f64,
}

impl StoreOptions {
    /// Options for the given path with default tuning.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Check the tuning values.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !(self.merge_trigger > 0.0 && self.merge_trigger <= 1.0) {
            return Err(StoreError::InvalidMergeTrigger(self.merge_trigger));
        }
        Ok(())
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("testdb"),
            max_file_size: 1024 * 1024 * 1024,
            merge_window: MergeWindow::default(),
            merge_trigger: 0.6,
        }
    }
}
