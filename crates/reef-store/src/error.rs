//! Error types for record storage.

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The store has been closed; no further operations are accepted.
    #[error("store is closed")]
    Closed,

    /// The merge window is not of the form `"HH_HH"` with hours in `0..=23`.
    #[error("invalid merge window {0:?}: expected \"HH_HH\" with hours 0-23")]
    InvalidMergeWindow(String),

    /// The merge trigger ratio is outside `(0, 1]`.
    #[error("invalid merge trigger {0}: expected a ratio in (0, 1]")]
    InvalidMergeTrigger(f64),
}
