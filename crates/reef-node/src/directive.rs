//! Migration directives carried in the key of a `get`.
//!
//! A key of the form `@#$<host>-<left>-<right>` asks the node to push every
//! record whose key hash lies in `KeyRange::new(left, right)` to `host`.
//! The node answers such a `get` with [`ACK`] instead of a stored value.

use std::fmt;

use reef_partition::KeyRange;

use crate::error::DirectiveError;

/// Prefix marking a key as a migration directive.
pub const SENTINEL: &[u8] = b"@#$";

/// Value returned for an accepted directive.
pub const ACK: &[u8] = b"TRUST ME";

/// A request to move one hash range to another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDirective {
    /// Destination `host:port` of the receiving node.
    pub host: String,
    /// Hash range to move.
    pub range: KeyRange,
}

impl MigrationDirective {
    /// Directive moving `range` to `host`.
    pub fn new(host: impl Into<String>, range: KeyRange) -> Self {
        Self {
            host: host.into(),
            range,
        }
    }

    /// Whether `key` carries the directive sentinel.
    pub fn is_directive(key: &[u8]) -> bool {
        key.starts_with(SENTINEL)
    }

    /// Decode a directive key.
    ///
    /// Returns `Ok(None)` for ordinary keys. The host may itself contain `-`;
    /// the last two fields are always the bounds.
    pub fn decode(key: &[u8]) -> Result<Option<Self>, DirectiveError> {
        let Some(rest) = key.strip_prefix(SENTINEL) else {
            return Ok(None);
        };
        let rest = std::str::from_utf8(rest).map_err(|_| DirectiveError::NotUtf8)?;

        let mut fields = rest.rsplitn(3, '-');
        let (Some(right), Some(left), Some(host)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(DirectiveError::MissingFields(rest.to_string()));
        };
        if host.is_empty() {
            return Err(DirectiveError::EmptyHost(rest.to_string()));
        }

        Ok(Some(Self {
            host: host.to_string(),
            range: KeyRange::new(parse_bound(left)?, parse_bound(right)?),
        }))
    }

    /// The key form of this directive, as sent with `get`.
    pub fn encode(&self) -> Vec<u8> {
        let mut key = SENTINEL.to_vec();
        key.extend_from_slice(format!("{}-{}", self.host, self.range).as_bytes());
        key
    }
}

impl fmt::Display for MigrationDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.range, self.host)
    }
}

fn parse_bound(field: &str) -> Result<u32, DirectiveError> {
    // `u32::from_str` also takes a leading `+`; only plain digits are valid here.
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DirectiveError::InvalidBound(field.to_string()));
    }
    field
        .parse()
        .map_err(|_| DirectiveError::InvalidBound(field.to_string()))
}
