//! Memcached text protocol for reef.
//!
//! This crate turns any [`CacheBackend`] into a network service and lets a
//! node talk to its peers through the same protocol:
//!
//! - [`parse_command`] / [`Reply`]: incremental request parsing and reply
//!   encoding for the subset of the protocol reef serves (`get`, `gets`,
//!   `set`, `delete`, `stats`, `version`, `quit`).
//! - [`MemcacheServer`]: TCP accept loop, one task per connection, graceful
//!   shutdown through a [`ShutdownHandle`].
//! - [`MemcacheClient`]: a lazily connected client with reconnect-on-error.
//!
//! Every served request is logged on the [`ACCESS_LOG_TARGET`] target.

mod backend;
mod client;
mod command;
mod error;
mod server;

pub use backend::CacheBackend;
pub use client::MemcacheClient;
pub use command::{
    Command, MAX_KEY_LEN, MAX_LINE_LEN, MAX_VALUE_LEN, ParseStatus, Reply, parse_command,
    validate_key,
};
pub use error::ProtoError;
pub use server::{ACCESS_LOG_TARGET, MemcacheServer, ShutdownHandle};
