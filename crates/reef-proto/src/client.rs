//! Minimal memcached client used to push records to peer nodes.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::command::{MAX_VALUE_LEN, validate_key};
use crate::error::ProtoError;

type Result<T> = std::result::Result<T, ProtoError>;
type Connection = BufStream<TcpStream>;

/// Default bound on one request/reply exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A client for one memcached server.
///
/// Connects lazily on first use and keeps the connection for later requests.
/// A connection that saw any error is dropped, and the next request dials
/// again. Requests on one client are serialized.
pub struct MemcacheClient {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl MemcacheClient {
    /// Client for the server at `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
            conn: Mutex::new(None),
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Server address this client talks to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Store a value. Returns `true` on `STORED`; with `noreply` the server's
    /// answer is not awaited and `true` is returned once the request is sent.
    pub async fn set(&self, key: &[u8], value: &[u8], noreply: bool) -> Result<bool> {
        validate_key(key)?;
        let mut request = Vec::with_capacity(key.len() + value.len() + 32);
        request.extend_from_slice(b"set ");
        request.extend_from_slice(key);
        let suffix = if noreply { " noreply" } else { "" };
        request.extend_from_slice(format!(" 0 0 {}{suffix}\r\n", value.len()).as_bytes());
        request.extend_from_slice(value);
        request.extend_from_slice(b"\r\n");

        let mut slot = self.conn.lock().await;
        let mut conn = self.checkout(&mut slot).await?;
        let result = self
            .bounded(async {
                send(&mut conn, &request).await?;
                if noreply {
                    return Ok(true);
                }
                match read_line(&mut conn).await?.as_str() {
                    "STORED" => Ok(true),
                    "NOT_STORED" => Ok(false),
                    other => Err(reply_error(other)),
                }
            })
            .await;
        if result.is_ok() {
            *slot = Some(conn);
        }
        result
    }

    /// Fetch a value. `None` on a miss.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        validate_key(key)?;
        let mut request = Vec::with_capacity(key.len() + 6);
        request.extend_from_slice(b"get ");
        request.extend_from_slice(key);
        request.extend_from_slice(b"\r\n");

        let mut slot = self.conn.lock().await;
        let mut conn = self.checkout(&mut slot).await?;
        let result = self
            .bounded(async {
                send(&mut conn, &request).await?;
                let mut found = None;
                loop {
                    let line = read_line(&mut conn).await?;
                    if line == "END" {
                        return Ok(found);
                    }
                    let Some(header) = line.strip_prefix("VALUE ") else {
                        return Err(reply_error(&line));
                    };
                    let len = header
                        .split(' ')
                        .nth(2)
                        .and_then(|n| n.parse::<usize>().ok())
                        .ok_or_else(|| ProtoError::UnexpectedReply(line.clone()))?;
                    if len > MAX_VALUE_LEN {
                        return Err(ProtoError::UnexpectedReply(format!(
                            "value of {len} bytes exceeds the {MAX_VALUE_LEN} byte limit"
                        )));
                    }
                    let block = len.checked_add(2).ok_or_else(|| {
                        ProtoError::UnexpectedReply(format!("value length {len} overflows"))
                    })?;
                    let mut data = vec![0u8; block];
                    conn.read_exact(&mut data).await?;
                    if !data.ends_with(b"\r\n") {
                        return Err(ProtoError::UnexpectedReply(
                            "value block not terminated".to_string(),
                        ));
                    }
                    data.truncate(len);
                    found = Some(Bytes::from(data));
                }
            })
            .await;
        if result.is_ok() {
            *slot = Some(conn);
        }
        result
    }

    /// Delete a key. Returns `false` on `NOT_FOUND`.
    pub async fn delete(&self, key: &[u8]) -> Result<bool> {
        validate_key(key)?;
        let mut request = Vec::with_capacity(key.len() + 9);
        request.extend_from_slice(b"delete ");
        request.extend_from_slice(key);
        request.extend_from_slice(b"\r\n");

        let mut slot = self.conn.lock().await;
        let mut conn = self.checkout(&mut slot).await?;
        let result = self
            .bounded(async {
                send(&mut conn, &request).await?;
                match read_line(&mut conn).await?.as_str() {
                    "DELETED" => Ok(true),
                    "NOT_FOUND" => Ok(false),
                    other => Err(reply_error(other)),
                }
            })
            .await;
        if result.is_ok() {
            *slot = Some(conn);
        }
        result
    }

    /// Take the cached connection, or dial a new one.
    async fn checkout(&self, slot: &mut Option<Connection>) -> Result<Connection> {
        if let Some(conn) = slot.take() {
            return Ok(conn);
        }
        let stream = self
            .bounded(async { Ok(TcpStream::connect(&self.addr).await?) })
            .await?;
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "connected to memcache server");
        Ok(BufStream::new(stream))
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProtoError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("request to {} timed out", self.addr),
            ))),
        }
    }
}

async fn send(conn: &mut Connection, request: &[u8]) -> Result<()> {
    conn.write_all(request).await?;
    conn.flush().await?;
    Ok(())
}

/// Read one reply line without its line terminator.
async fn read_line(conn: &mut Connection) -> Result<String> {
    let mut line = Vec::new();
    if conn.read_until(b'\n', &mut line).await? == 0 {
        return Err(ProtoError::ConnectionClosed);
    }
    if line.ends_with(b"\n") {
        line.pop();
    }
    if line.ends_with(b"\r") {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

fn reply_error(line: &str) -> ProtoError {
    if line == "ERROR" {
        ProtoError::UnknownCommand(line.to_string())
    } else if let Some(msg) = line.strip_prefix("CLIENT_ERROR ") {
        ProtoError::Client(msg.to_string())
    } else if let Some(msg) = line.strip_prefix("SERVER_ERROR ") {
        ProtoError::Server(msg.to_string())
    } else {
        ProtoError::UnexpectedReply(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use tokio::net::TcpListener;

    use super::*;
    use crate::backend::CacheBackend;
    use crate::server::{MemcacheServer, ShutdownHandle};

    #[derive(Default)]
    struct MapBackend {
        map: Mutex<HashMap<Vec<u8>, Bytes>>,
    }

    #[async_trait::async_trait]
    impl CacheBackend for MapBackend {
        type Error = std::io::Error;

        async fn get(&self, key: &[u8]) -> std::io::Result<Option<Bytes>> {
            Ok(self.map.lock().await.get(key).cloned())
        }

        async fn set(&self, key: &[u8], value: Bytes) -> std::io::Result<bool> {
            self.map.lock().await.insert(key.to_vec(), value);
            Ok(true)
        }

        async fn delete(&self, key: &[u8]) -> std::io::Result<bool> {
            Ok(self.map.lock().await.remove(key).is_some())
        }

        async fn len(&self) -> std::io::Result<u64> {
            Ok(self.map.lock().await.len() as u64)
        }
    }

    async fn start_server() -> (String, ShutdownHandle) {
        let mut server = MemcacheServer::new(Arc::new(MapBackend::default()));
        let addr = server.listen("127.0.0.1:0").await.unwrap();
        let handle = server.shutdown_handle();
        tokio::spawn(async move { server.serve().await });
        (addr.to_string(), handle)
    }

    /// A server that answers each connection's first request with `reply`,
    /// then hangs up.
    async fn one_shot_server(reply: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(reply).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_set_get_delete_against_server() {
        let (addr, handle) = start_server().await;
        let client = MemcacheClient::new(addr);

        assert!(client.set(b"k", b"hello", false).await.unwrap());
        assert_eq!(
            client.get(b"k").await.unwrap(),
            Some(Bytes::from_static(b"hello"))
        );
        assert_eq!(client.get(b"missing").await.unwrap(), None);
        assert!(client.delete(b"k").await.unwrap());
        assert!(!client.delete(b"k").await.unwrap());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_binary_value_with_crlf() {
        let (addr, handle) = start_server().await;
        let client = MemcacheClient::new(addr);

        let value = b"line1\r\nline2\r\n\0\xff";
        assert!(client.set(b"bin", value, false).await.unwrap());
        assert_eq!(client.get(b"bin").await.unwrap().unwrap(), &value[..]);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_noreply_set_then_get() {
        let (addr, handle) = start_server().await;
        let client = MemcacheClient::new(addr);

        assert!(client.set(b"quiet", b"v", true).await.unwrap());
        // Same connection, so the get is processed after the set.
        assert_eq!(
            client.get(b"quiet").await.unwrap(),
            Some(Bytes::from_static(b"v"))
        );

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_locally() {
        let client = MemcacheClient::new("127.0.0.1:1");
        assert!(matches!(
            client.set(b"bad key", b"v", false).await,
            Err(ProtoError::Client(_))
        ));
    }

    #[tokio::test]
    async fn test_error_replies_are_mapped() {
        let addr = one_shot_server(b"SERVER_ERROR out of memory\r\n").await;
        let client = MemcacheClient::new(addr);
        assert!(matches!(
            client.set(b"k", b"v", false).await,
            Err(ProtoError::Server(msg)) if msg == "out of memory"
        ));

        let addr = one_shot_server(b"ERROR\r\n").await;
        let client = MemcacheClient::new(addr);
        assert!(matches!(
            client.delete(b"k").await,
            Err(ProtoError::UnknownCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_value_header_rejected() {
        let addr = one_shot_server(b"VALUE k 0 18446744073709551615\r\n").await;
        let client = MemcacheClient::new(addr);
        assert!(matches!(
            client.get(b"k").await,
            Err(ProtoError::UnexpectedReply(_))
        ));

        let addr = one_shot_server(b"VALUE k 0 1048577\r\n").await;
        let client = MemcacheClient::new(addr);
        assert!(matches!(
            client.get(b"k").await,
            Err(ProtoError::UnexpectedReply(msg)) if msg.contains("1048577")
        ));
    }

    #[tokio::test]
    async fn test_reconnects_after_connection_loss() {
        let addr = one_shot_server(b"STORED\r\n").await;
        let client = MemcacheClient::new(addr);

        assert!(client.set(b"k", b"v", false).await.unwrap());
        // The server hung up after the first reply.
        assert!(client.set(b"k", b"v", false).await.is_err());
        // The broken connection was dropped; this one dials again.
        assert!(client.set(b"k", b"v", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = MemcacheClient::new(addr);
        assert!(matches!(
            client.get(b"k").await,
            Err(ProtoError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = MemcacheClient::new(addr).with_timeout(Duration::from_millis(100));
        match client.get(b"k").await {
            Err(ProtoError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
