//! Session error types.

use mssql_codec::CodecError;
use tds_protocol::{ProtocolError, ServerMessage};
use thiserror::Error;

use crate::state::LoginState;

/// Errors raised by a protocol session.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure, passed through unchanged.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire-shape or framing violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(#[from] mssql_tls::TlsError),

    /// The credential provider failed.
    #[error("authentication error: {0}")]
    Auth(#[from] mssql_auth::AuthError),

    /// The server sent an ERROR token.
    #[error("server error {number}: {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Severity class (0-25).
        class: u8,
        /// Error state.
        state: u8,
        /// Message text.
        message: String,
        /// Server name, if sent.
        server: Option<String>,
        /// Procedure name, if any.
        procedure: Option<String>,
        /// Line number in the batch or procedure.
        line: u32,
    },

    /// A login step was attempted out of order.
    #[error("invalid login transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// State the flow was in.
        from: LoginState,
        /// State that was requested.
        to: LoginState,
    },

    /// The login response carried no LOGINACK.
    #[error("login was not acknowledged by the server")]
    LoginRejected,

    /// An earlier operation was abandoned or failed mid-token; the byte
    /// stream position is unknown.
    #[error("session is poisoned by an interrupted operation")]
    Poisoned,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => Self::Io(e),
            CodecError::Protocol(e) => Self::Protocol(e),
        }
    }
}

impl From<ServerMessage> for Error {
    fn from(msg: ServerMessage) -> Self {
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        Self::Server {
            number: msg.number,
            class: msg.class,
            state: msg.state,
            message: msg.message,
            server: non_empty(msg.server),
            procedure: non_empty(msg.procedure),
            line: msg.line,
        }
    }
}

impl Error {
    /// Whether the session must be discarded after this error.
    ///
    /// Only a server-reported error leaves the token stream in a known
    /// position.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Server { .. })
    }

    /// Whether the peer closed the connection.
    #[must_use]
    pub fn is_connection_closed(&self) -> bool {
        match self {
            Self::Protocol(ProtocolError::ConnectionClosed) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        matches!(self, Self::Server { number: n, .. } if *n == number)
    }

    /// Severity class of a server error.
    ///
    /// - 0-10: informational
    /// - 11-16: user errors
    /// - 17-19: resource errors
    /// - 20-25: fatal, the server closes the connection
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { class, .. } => Some(*class),
            _ => None,
        }
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
