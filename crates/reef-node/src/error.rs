//! Error types for the node.

use reef_proto::ProtoError;
use reef_store::StoreError;

/// Errors raised while serving requests or starting a node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// A store operation failed.
    #[error("store {op} failed for key {key:?}: {source}")]
    Store {
        /// Operation that failed (`get`, `set`, ...).
        op: &'static str,
        /// Key involved, lossily decoded. Empty for whole-store operations.
        key: String,
        /// Underlying store error.
        source: StoreError,
    },

    /// Protocol or transport failure.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// Configuration rejected at startup.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl NodeError {
    /// Wrap a store error with the operation and key it happened on.
    pub fn store(op: &'static str, key: &[u8], source: StoreError) -> Self {
        NodeError::Store {
            op,
            key: String::from_utf8_lossy(key).into_owned(),
            source,
        }
    }
}

/// Why a sentinel-prefixed key could not be decoded as a migration directive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    /// The part after the sentinel is not UTF-8.
    #[error("directive is not valid UTF-8")]
    NotUtf8,

    /// Fewer than three `-`-separated fields.
    #[error("directive {0:?} is not of the form host-left-right")]
    MissingFields(String),

    /// The host field is empty.
    #[error("directive {0:?} has an empty host")]
    EmptyHost(String),

    /// A bound is not a decimal `u32`.
    #[error("directive bound {0:?} is not a 32-bit unsigned integer")]
    InvalidBound(String),
}
