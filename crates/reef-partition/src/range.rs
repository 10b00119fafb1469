//! [`KeyRange`] and key membership tests.

use std::fmt;

/// Position of a key on the 32-bit hash ring: CRC-32 (IEEE) of its raw bytes.
pub fn key_hash(key: &[u8]) -> u32 {
    crc32fast::hash(key)
}

/// A subset of the 32-bit hash ring.
///
/// - `left < right`: the contiguous interval `[left, right)`.
/// - `left > right`: wraps past zero, i.e. everything except `[right, left)`.
/// - `left == right`: empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyRange {
    /// Inclusive start of the range.
    pub left: u32,
    /// Exclusive end of the range.
    pub right: u32,
}

impl KeyRange {
    /// Create a range from its two bounds.
    pub const fn new(left: u32, right: u32) -> Self {
        Self { left, right }
    }

    /// Whether the range crosses the 0 / 2^32 boundary.
    pub const fn is_wrapping(&self) -> bool {
        self.left > self.right
    }

    /// Whether no hash can fall in this range.
    pub const fn is_empty(&self) -> bool {
        self.left == self.right
    }

    /// Whether a hash value falls in this range.
    pub const fn contains_hash(&self, hash: u32) -> bool {
        if self.left < self.right {
            self.left <= hash && hash < self.right
        } else if self.left > self.right {
            // Complement of [right, left).
            !(self.right <= hash && hash < self.left)
        } else {
            false
        }
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.left, self.right)
    }
}

/// Whether `key` hashes into `range`.
pub fn belongs_to_range(key: &[u8], range: &KeyRange) -> bool {
    range.contains_hash(key_hash(key))
}
