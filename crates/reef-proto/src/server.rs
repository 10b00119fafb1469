//! TCP server speaking the memcached text protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::CacheBackend;
use crate::command::{Command, ParseStatus, Reply, parse_command};
use crate::error::ProtoError;

/// Tracing target every served request is logged under.
pub const ACCESS_LOG_TARGET: &str = "reef::access";

/// Version string reported by the `version` and `stats` commands.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const READ_BUF_SIZE: usize = 4096;

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Cloneable handle that stops a [`MemcacheServer`].
///
/// Shutting down is idempotent: the first call stops the accept loop and
/// closes idle connections, later calls do nothing.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// A handle that has not been triggered.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        if !self.tx.send_replace(true) {
            info!("server shutdown requested");
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that flips to `true` on shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves a [`CacheBackend`] to memcached clients.
///
/// ```ignore
/// let mut server = MemcacheServer::new(backend);
/// server.listen("0.0.0.0:7900").await?;
/// let handle = server.shutdown_handle();
/// server.serve().await?; // returns after handle.shutdown()
/// ```
pub struct MemcacheServer<B> {
    backend: Arc<B>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    shutdown: ShutdownHandle,
    started: Instant,
}

impl<B: CacheBackend + 'static> MemcacheServer<B> {
    /// Create a server for `backend`. Nothing is bound until [`listen`](Self::listen).
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            listener: None,
            local_addr: None,
            shutdown: ShutdownHandle::new(),
            started: Instant::now(),
        }
    }

    /// Bind the listening socket and return the bound address.
    pub async fn listen(&mut self, addr: impl ToSocketAddrs) -> Result<SocketAddr, ProtoError> {
        if self.local_addr.is_some() {
            return Err(ProtoError::AlreadyListening);
        }
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "memcache server listening");
        self.listener = Some(listener);
        self.local_addr = Some(local);
        Ok(local)
    }

    /// Address the server is bound to, once [`listen`](Self::listen) succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Handle for stopping [`serve`](Self::serve) from elsewhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown, then wait for open connections to
    /// finish their current request.
    pub async fn serve(&mut self) -> Result<(), ProtoError> {
        let listener = self.listener.take().ok_or(ProtoError::NotListening)?;
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut connections = JoinSet::new();

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let session = Session {
                            backend: self.backend.clone(),
                            peer,
                            started: self.started,
                        };
                        connections.spawn(session.run(stream, self.shutdown.subscribe()));
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = shutdown_rx.changed() => {}
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "connection task failed");
                    }
                }
            }
        }

        drop(listener);
        let open = connections.len();
        if open > 0 {
            debug!(open, "waiting for connections to close");
        }
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "connection task failed");
            }
        }
        info!("memcache server stopped");
        Ok(())
    }
}

/// State of one client connection.
struct Session<B> {
    backend: Arc<B>,
    peer: SocketAddr,
    started: Instant,
}

impl<B: CacheBackend> Session<B> {
    async fn run(self, stream: TcpStream, shutdown: watch::Receiver<bool>) {
        debug!(peer = %self.peer, "connection opened");
        match self.serve(stream, shutdown).await {
            Ok(()) => debug!(peer = %self.peer, "connection closed"),
            Err(e) => debug!(peer = %self.peer, error = %e, "connection closed with error"),
        }
    }

    async fn serve(
        &self,
        mut stream: TcpStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ProtoError> {
        let mut read_buf = BytesMut::with_capacity(READ_BUF_SIZE);
        let mut out = Vec::with_capacity(READ_BUF_SIZE);

        loop {
            // Answer everything already buffered before reading again.
            loop {
                match parse_command(&read_buf) {
                    Ok(ParseStatus::Incomplete) => break,
                    Ok(ParseStatus::Complete { command, consumed }) => {
                        read_buf.advance(consumed);
                        if command == Command::Quit {
                            stream.write_all(&out).await?;
                            return Ok(());
                        }
                        if let Some(reply) = self.execute(command).await {
                            reply.encode(&mut out);
                        }
                    }
                    Ok(ParseStatus::Invalid { error, consumed }) => {
                        read_buf.advance(consumed);
                        let reply = error.to_reply();
                        self.log_access("invalid", "", &reply, Instant::now());
                        reply.encode(&mut out);
                    }
                    Err(e) => {
                        e.to_reply().encode(&mut out);
                        stream.write_all(&out).await?;
                        return Err(e);
                    }
                }
            }

            if !out.is_empty() {
                stream.write_all(&out).await?;
                out.clear();
            }
            if *shutdown.borrow_and_update() {
                return Ok(());
            }

            tokio::select! {
                read = stream.read_buf(&mut read_buf) => {
                    if read? == 0 {
                        return Ok(());
                    }
                }
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    /// Run one command. `None` means the client asked for no reply.
    async fn execute(&self, command: Command) -> Option<Reply> {
        let start = Instant::now();
        match command {
            Command::Get { keys, cas } => {
                let mut hits = Vec::new();
                let mut reply = None;
                for key in &keys {
                    match self.backend.get(key).await {
                        Ok(Some(value)) => hits.push((key.clone(), value)),
                        Ok(None) => {}
                        Err(e) => {
                            reply = Some(Reply::ServerError(e.to_string()));
                            break;
                        }
                    }
                }
                let reply = reply.unwrap_or(Reply::Values { hits, cas });
                let op = if cas { "gets" } else { "get" };
                let key = keys
                    .iter()
                    .map(|k| String::from_utf8_lossy(k))
                    .collect::<Vec<_>>()
                    .join(" ");
                self.log_access(op, &key, &reply, start);
                Some(reply)
            }
            Command::Set {
                key,
                value,
                noreply,
                ..
            } => {
                let reply = match self.backend.set(&key, value).await {
                    Ok(true) => Reply::Stored,
                    Ok(false) => Reply::NotStored,
                    Err(e) => Reply::ServerError(e.to_string()),
                };
                self.log_access("set", &String::from_utf8_lossy(&key), &reply, start);
                (!noreply).then_some(reply)
            }
            Command::Delete { key, noreply } => {
                let reply = match self.backend.delete(&key).await {
                    Ok(true) => Reply::Deleted,
                    Ok(false) => Reply::NotFound,
                    Err(e) => Reply::ServerError(e.to_string()),
                };
                self.log_access("delete", &String::from_utf8_lossy(&key), &reply, start);
                (!noreply).then_some(reply)
            }
            Command::Stats => {
                let reply = match self.backend.len().await {
                    Ok(items) => Reply::Stats(vec![
                        ("pid".to_string(), std::process::id().to_string()),
                        (
                            "uptime".to_string(),
                            self.started.elapsed().as_secs().to_string(),
                        ),
                        ("version".to_string(), VERSION.to_string()),
                        ("curr_items".to_string(), items.to_string()),
                    ]),
                    Err(e) => Reply::ServerError(e.to_string()),
                };
                self.log_access("stats", "", &reply, start);
                Some(reply)
            }
            Command::Version => Some(Reply::Version(VERSION.to_string())),
            Command::Quit => None,
        }
    }

    fn log_access(&self, op: &str, key: &str, reply: &Reply, start: Instant) {
        info!(
            target: ACCESS_LOG_TARGET,
            peer = %self.peer,
            op,
            key,
            status = reply.status(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "request"
        );
    }
}
