//! Hash-range partitioning for the reef keyspace.
//!
//! Keys are placed on a 32-bit ring by their CRC-32 (IEEE) checksum. An
//! external consistent-hashing layer assigns each node one or more
//! [`KeyRange`]s of that ring; a node answers "is this key mine?" and "which
//! keys must move?" with [`belongs_to_range`].
//!
//! The verdict depends only on the key bytes and the two bounds, so every node
//! and every process agrees on it without coordination.

mod range;

pub use range::{KeyRange, belongs_to_range, key_hash};
