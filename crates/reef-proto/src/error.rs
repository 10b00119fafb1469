//! Error types for the memcached protocol layer.

use crate::command::Reply;

/// Errors produced while parsing, serving, or sending memcached requests.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// An I/O error on the socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The request was not understood (`ERROR`).
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The request was malformed (`CLIENT_ERROR`).
    #[error("client error: {0}")]
    Client(String),

    /// The server failed to carry out the request (`SERVER_ERROR`).
    #[error("server error: {0}")]
    Server(String),

    /// A reply line did not match the request that was sent.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The peer closed the connection mid-reply.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// [`serve`](crate::MemcacheServer::serve) was called before
    /// [`listen`](crate::MemcacheServer::listen).
    #[error("server is not listening")]
    NotListening,

    /// [`listen`](crate::MemcacheServer::listen) was called twice.
    #[error("server is already listening")]
    AlreadyListening,
}

impl ProtoError {
    /// The reply a server sends back for this error.
    pub fn to_reply(&self) -> Reply {
        match self {
            ProtoError::UnknownCommand(_) => Reply::Error,
            ProtoError::Client(msg) => Reply::ClientError(msg.clone()),
            other => Reply::ServerError(other.to_string()),
        }
    }
}
