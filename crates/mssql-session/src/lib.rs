//! # mssql-session
//!
//! Client-side TDS session engine: PRELOGIN negotiation, the TLS-in-PRELOGIN
//! handshake, LOGIN7 and streaming token decoding.
//!
//! ```text
//! Disconnected -> TcpConnected -> PreloginSent -> PreloginReceived
//!     -> [TlsHandshaking -> TlsActive] -> LoginSent -> LoginAcknowledged
//! ```
//!
//! [`ProtocolSession`] holds the one implementation of the protocol, written
//! against `tokio::io`. [`BlockingSession`] drives the same code over a std
//! stream.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_auth::SqlCredentials;
//! use mssql_session::{Config, ProtocolSession, Token};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mssql_session::Error> {
//!     let config = Config::from_connection_string("Server=localhost;Database=master;")?;
//!     let mut session = ProtocolSession::connect(config).await?;
//!     session.login(&SqlCredentials::new("sa", "Password123")).await?;
//!
//!     for token in session.execute("SELECT 1").await? {
//!         if let Token::Row(values) = token {
//!             println!("{values:?}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod blocking;
pub mod config;
pub mod error;
pub mod login;
pub mod metadata;
pub mod session;
pub mod state;
pub mod token_reader;

pub use blocking::BlockingSession;
pub use config::Config;
pub use error::{Error, Result};
pub use metadata::ProtocolMetadata;
pub use session::{ProtocolSession, PumpMode};
pub use state::{LoginEvent, LoginFlow, LoginState};
pub use token_reader::{Token, TokenReader};
