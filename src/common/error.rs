//! Error handling module
//!
//! This module defines the error types and result type aliases used by the
//! multiplexer.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Multiplexer error type
#[derive(Error, Debug)]
pub enum MuxError {
    /// IO error (accept loop or connection I/O)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// No registered matcher claimed the connection
    #[error("connection{} did not match any registered protocol", fmt_peer(.peer))]
    NotMatched {
        /// Peer address of the rejected connection, when known
        peer: Option<SocketAddr>,
    },

    /// The sub-listener's queue was closed and drained
    #[error("listener closed")]
    ListenerClosed,

    /// The multiplexer shut down while the call was waiting
    #[error("multiplexer closed")]
    ServerClosed,
}

fn fmt_peer(peer: &Option<SocketAddr>) -> String {
    match peer {
        Some(addr) => format!(" from {}", addr),
        None => String::new(),
    }
}

impl MuxError {
    /// Whether the error is transient for the accept loop.
    ///
    /// Transient errors (momentary resource exhaustion, aborted handshakes)
    /// are retried by continuing to accept; anything else stops `serve`.
    /// The classification is public so embedder error policies can reuse it.
    pub fn is_transient(&self) -> bool {
        match self {
            MuxError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::TimedOut
            ),
            MuxError::NotMatched { .. } => true,
            MuxError::ListenerClosed | MuxError::ServerClosed => false,
        }
    }
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `MuxError`.
pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        // Test IO error conversion
        let io_err = io::Error::new(io::ErrorKind::NotFound, "socket gone");
        let mux_err: MuxError = io_err.into();

        match mux_err {
            MuxError::Io(_) => assert!(true),
            _ => panic!("Should convert to IO error"),
        }
    }

    #[test]
    fn test_error_display() {
        // Test error display with and without a peer address
        let err = MuxError::NotMatched {
            peer: Some("127.0.0.1:12345".parse().unwrap()),
        };
        let err_str = format!("{}", err);
        assert!(err_str.contains("127.0.0.1:12345"));

        let err = MuxError::NotMatched { peer: None };
        assert!(format!("{}", err).contains("did not match"));
    }

    #[test]
    fn test_transience() {
        let aborted = MuxError::Io(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted"));
        assert!(aborted.is_transient());

        let fatal = MuxError::Io(io::Error::new(io::ErrorKind::InvalidInput, "bad fd"));
        assert!(!fatal.is_transient());

        assert!(!MuxError::ServerClosed.is_transient());
        assert!(MuxError::NotMatched { peer: None }.is_transient());
    }
}
