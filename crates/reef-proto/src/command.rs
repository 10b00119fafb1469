//! Request parsing and reply encoding for the memcached text protocol.
//!
//! Parsing is incremental: [`parse_command`] looks at the bytes buffered so
//! far and either asks for more, returns one complete command with the number
//! of bytes it used, or reports a bad command together with how many bytes to
//! skip so the connection can carry on with the next one.

use std::str::FromStr;

use bytes::Bytes;

use crate::error::ProtoError;

/// Longest key the protocol accepts.
pub const MAX_KEY_LEN: usize = 250;

/// Largest value accepted by `set`.
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

/// Longest command line tolerated while waiting for its terminating newline.
pub const MAX_LINE_LEN: usize = 2048;

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `get <key>+` or `gets <key>+`.
    Get {
        /// Keys to look up, in request order.
        keys: Vec<Bytes>,
        /// Whether the client asked for cas values (`gets`).
        cas: bool,
    },
    /// `set <key> <flags> <exptime> <bytes> [noreply]` followed by a data block.
    Set {
        /// Key to store under.
        key: Bytes,
        /// Opaque client flags. Accepted, not stored.
        flags: u32,
        /// Expiry. Accepted, not enforced.
        exptime: i64,
        /// The data block.
        value: Bytes,
        /// Suppress the reply.
        noreply: bool,
    },
    /// `delete <key> [noreply]`.
    Delete {
        /// Key to delete.
        key: Bytes,
        /// Suppress the reply.
        noreply: bool,
    },
    /// `stats`.
    Stats,
    /// `version`.
    Version,
    /// `quit`.
    Quit,
}

/// Outcome of trying to parse one command from a buffer.
#[derive(Debug)]
pub enum ParseStatus {
    /// More bytes are needed.
    Incomplete,
    /// One command was decoded from the first `consumed` bytes.
    Complete {
        /// The decoded command.
        command: Command,
        /// Bytes used by the command, including its data block.
        consumed: usize,
    },
    /// The first `consumed` bytes form a bad command; answer `error` and skip them.
    Invalid {
        /// What to tell the client.
        error: ProtoError,
        /// Bytes to discard.
        consumed: usize,
    },
}

/// Try to decode one command from the front of `buf`.
///
/// # Errors
///
/// Returns an error when the input cannot be resynchronized (a line longer
/// than [`MAX_LINE_LEN`] or a data block larger than [`MAX_VALUE_LEN`]); the
/// caller should answer and close the connection.
pub fn parse_command(buf: &[u8]) -> Result<ParseStatus, ProtoError> {
    let Some(newline) = buf.iter().position(|b| *b == b'\n') else {
        if buf.len() > MAX_LINE_LEN {
            return Err(ProtoError::Client("line too long".to_string()));
        }
        return Ok(ParseStatus::Incomplete);
    };
    let line_len = newline + 1;
    let line = buf[..newline].strip_suffix(b"\r").unwrap_or(&buf[..newline]);

    let mut parts = line.split(|b| *b == b' ').filter(|p| !p.is_empty());
    let Some(name) = parts.next() else {
        return Ok(invalid(
            ProtoError::UnknownCommand(String::new()),
            line_len,
        ));
    };
    let args: Vec<&[u8]> = parts.collect();

    let command = if name.eq_ignore_ascii_case(b"get") || name.eq_ignore_ascii_case(b"gets") {
        if args.is_empty() {
            return Ok(invalid(bad_format(), line_len));
        }
        let mut keys = Vec::with_capacity(args.len());
        for key in &args {
            if let Err(e) = validate_key(key) {
                return Ok(invalid(e, line_len));
            }
            keys.push(Bytes::copy_from_slice(key));
        }
        Command::Get {
            keys,
            cas: name.eq_ignore_ascii_case(b"gets"),
        }
    } else if name.eq_ignore_ascii_case(b"set") {
        return parse_set(buf, line_len, &args);
    } else if name.eq_ignore_ascii_case(b"delete") {
        let noreply = match args.as_slice() {
            [_] => false,
            [_, flag] if flag.eq_ignore_ascii_case(b"noreply") => true,
            _ => return Ok(invalid(bad_format(), line_len)),
        };
        if let Err(e) = validate_key(args[0]) {
            return Ok(invalid(e, line_len));
        }
        Command::Delete {
            key: Bytes::copy_from_slice(args[0]),
            noreply,
        }
    } else if name.eq_ignore_ascii_case(b"stats") {
        Command::Stats
    } else if name.eq_ignore_ascii_case(b"version") {
        Command::Version
    } else if name.eq_ignore_ascii_case(b"quit") {
        Command::Quit
    } else {
        let name = String::from_utf8_lossy(name).into_owned();
        return Ok(invalid(ProtoError::UnknownCommand(name), line_len));
    };

    Ok(ParseStatus::Complete {
        command,
        consumed: line_len,
    })
}

fn parse_set(buf: &[u8], line_len: usize, args: &[&[u8]]) -> Result<ParseStatus, ProtoError> {
    let noreply = match args.len() {
        4 => false,
        5 if args[4].eq_ignore_ascii_case(b"noreply") => true,
        _ => return Ok(invalid(bad_format(), line_len)),
    };
    if let Err(e) = validate_key(args[0]) {
        return Ok(invalid(e, line_len));
    }
    let (Some(flags), Some(exptime), Some(len)) = (
        parse_num::<u32>(args[1]),
        parse_num::<i64>(args[2]),
        parse_num::<usize>(args[3]),
    ) else {
        return Ok(invalid(bad_format(), line_len));
    };
    if len > MAX_VALUE_LEN {
        return Err(ProtoError::Server("object too large for cache".to_string()));
    }

    let data_end = line_len + len;
    let total = data_end + 2;
    if buf.len() < total {
        return Ok(ParseStatus::Incomplete);
    }
    if &buf[data_end..total] != b"\r\n" {
        // Resynchronize on the next newline after the declared block.
        let consumed = buf[data_end..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(total, |p| data_end + p + 1);
        return Ok(invalid(
            ProtoError::Client("bad data chunk".to_string()),
            consumed,
        ));
    }

    Ok(ParseStatus::Complete {
        command: Command::Set {
            key: Bytes::copy_from_slice(args[0]),
            flags,
            exptime,
            value: Bytes::copy_from_slice(&buf[line_len..data_end]),
            noreply,
        },
        consumed: total,
    })
}

/// Check that a key is 1..=[`MAX_KEY_LEN`] bytes with no spaces or control
/// characters.
pub fn validate_key(key: &[u8]) -> Result<(), ProtoError> {
    if key.is_empty() {
        return Err(ProtoError::Client("empty key".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ProtoError::Client("key too long".to_string()));
    }
    if key.iter().any(|b| *b <= b' ' || *b == 0x7f) {
        return Err(ProtoError::Client("invalid key".to_string()));
    }
    Ok(())
}

fn invalid(error: ProtoError, consumed: usize) -> ParseStatus {
    ParseStatus::Invalid { error, consumed }
}

fn bad_format() -> ProtoError {
    ProtoError::Client("bad command line format".to_string())
}

fn parse_num<T: FromStr>(field: &[u8]) -> Option<T> {
    std::str::from_utf8(field).ok()?.parse().ok()
}

/// A server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Hits for a `get`, terminated by `END`.
    Values {
        /// `(key, value)` for every key that was found.
        hits: Vec<(Bytes, Bytes)>,
        /// Include a (zero) cas field.
        cas: bool,
    },
    /// `STORED`.
    Stored,
    /// `NOT_STORED`.
    NotStored,
    /// `DELETED`.
    Deleted,
    /// `NOT_FOUND`.
    NotFound,
    /// `STAT <name> <value>` lines, terminated by `END`.
    Stats(Vec<(String, String)>),
    /// `VERSION <version>`.
    Version(String),
    /// `ERROR`.
    Error,
    /// `CLIENT_ERROR <message>`.
    ClientError(String),
    /// `SERVER_ERROR <message>`.
    ServerError(String),
}

impl Reply {
    /// Append the wire form of this reply to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Values { hits, cas } => {
                for (key, value) in hits {
                    out.extend_from_slice(b"VALUE ");
                    out.extend_from_slice(key);
                    let header = if *cas {
                        format!(" 0 {} 0\r\n", value.len())
                    } else {
                        format!(" 0 {}\r\n", value.len())
                    };
                    out.extend_from_slice(header.as_bytes());
                    out.extend_from_slice(value);
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(b"END\r\n");
            }
            Reply::Stored => out.extend_from_slice(b"STORED\r\n"),
            Reply::NotStored => out.extend_from_slice(b"NOT_STORED\r\n"),
            Reply::Deleted => out.extend_from_slice(b"DELETED\r\n"),
            Reply::NotFound => out.extend_from_slice(b"NOT_FOUND\r\n"),
            Reply::Stats(stats) => {
                for (name, value) in stats {
                    out.extend_from_slice(format!("STAT {name} {value}\r\n").as_bytes());
                }
                out.extend_from_slice(b"END\r\n");
            }
            Reply::Version(version) => {
                out.extend_from_slice(format!("VERSION {version}\r\n").as_bytes());
            }
            Reply::Error => out.extend_from_slice(b"ERROR\r\n"),
            Reply::ClientError(msg) => {
                out.extend_from_slice(format!("CLIENT_ERROR {msg}\r\n").as_bytes());
            }
            Reply::ServerError(msg) => {
                out.extend_from_slice(format!("SERVER_ERROR {msg}\r\n").as_bytes());
            }
        }
    }

    /// Short status word for access logging.
    pub fn status(&self) -> &'static str {
        match self {
            Reply::Values { hits, .. } if hits.is_empty() => "MISS",
            Reply::Values { .. } => "HIT",
            Reply::Stored => "STORED",
            Reply::NotStored => "NOT_STORED",
            Reply::Deleted => "DELETED",
            Reply::NotFound => "NOT_FOUND",
            Reply::Stats(_) => "STATS",
            Reply::Version(_) => "VERSION",
            Reply::Error => "ERROR",
            Reply::ClientError(_) => "CLIENT_ERROR",
            Reply::ServerError(_) => "SERVER_ERROR",
        }
    }
}
