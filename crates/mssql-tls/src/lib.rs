//! # mssql-tls
//!
//! TLS for the TDS login handshake.
//!
//! In TDS 7.x the TLS handshake runs after PRELOGIN and its records travel
//! inside PRELOGIN packets:
//!
//! ```text
//! TCP ─▶ PRELOGIN (clear) ─▶ TLS handshake in 0x12 packets ─▶ LOGIN7 (TLS)
//! ```
//!
//! [`TlsTunnel`] does that encapsulation until the handshake completes,
//! [`TlsConnector`] drives rustls, and [`Transport`] holds a stream that can
//! be switched to TLS and back (for login-only encryption) in place.
//!
//! Server certificates are validated against the Mozilla root set unless
//! extra roots are configured. `trust_server_certificate` turns validation
//! off and logs a warning.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod transport;
pub mod tunnel;

pub use config::{TlsConfig, TlsVersion};
pub use connector::TlsConnector;
pub use error::TlsError;
pub use transport::Transport;
pub use tunnel::TlsTunnel;

pub use tokio_rustls::client::TlsStream;
