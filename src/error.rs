//! # Bus errors
//!
//! All broker and client errors are abstracted in this mod. Protocol-level
//! failures (unknown command, key not found) are not errors; they are
//! [`Reply`](crate::protocol::Reply) values written back to the peer.
use thiserror::Error;

/// Bus errors
#[derive(Debug, Error)]
pub enum Error {
    /// The socket is closed, the connection was refused or a write failed
    #[error("transport is down: {0}")]
    TransportDown(String),

    /// A read exceeded the configured timeout
    #[error("read timed out")]
    Timeout,

    /// A response frame or payload did not follow the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A fetched record carried a different type tag than requested
    #[error("type mismatch: expected `{expected}`, got `{got}`")]
    TypeMismatch {
        /// The tag the caller asked for
        expected: String,
        /// The tag found in the fetched record
        got: String,
    },

    /// `wait_until_connected` exceeded its deadline
    #[error("the connection handshake timed out")]
    HandshakeTimeout,

    /// The configuration file could not be loaded or parsed
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Low-level socket error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A sendable payload could not be encoded or decoded
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors that mean the broker is unreachable and the client
    /// should flip its dead flag.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::TransportDown(_) | Error::Timeout | Error::Io(_))
    }
}
