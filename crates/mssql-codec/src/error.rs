//! Codec error types.

use std::io;

use tds_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by the framing layer.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Transport failure, passed through unchanged.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Framing or wire-shape violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl CodecError {
    /// Whether the peer closed the connection.
    #[must_use]
    pub fn is_connection_closed(&self) -> bool {
        match self {
            Self::Protocol(ProtocolError::ConnectionClosed) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
