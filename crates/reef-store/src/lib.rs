//! Record storage for a reef node.
//!
//! This crate defines the [`KvStore`] trait the node drives, along with two
//! concrete backends:
//!
//! - [`FjallStore`]: durable, log-structured storage on top of Fjall.
//! - [`MemoryStore`]: in-memory storage backed by a `RwLock<HashMap>`.
//!
//! Both expose the same contract: point reads and writes, a record count, a
//! one-shot stream of every key, and an explicit durability sync.

mod error;
mod fjall_store;
mod memory_store;
mod options;
mod traits;

pub use error::StoreError;
pub use fjall_store::FjallStore;
pub use memory_store::MemoryStore;
pub use options::{MergeWindow, StoreOptions};
pub use traits::{KEY_STREAM_CAPACITY, KeyStream, KvStore};
