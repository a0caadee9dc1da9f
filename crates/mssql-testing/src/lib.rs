//! # mssql-testing
//!
//! Test infrastructure for the TDS session crates.
//!
//! Everything here runs in-process: no Docker, no SQL Server instance.
//!
//! ## Features
//!
//! - [`MockServer`]: the server half of PRELOGIN, TLS and LOGIN7 over any
//!   async stream
//! - [`ResponseBuilder`]: encoders for the tokens a server sends
//! - [`TestCertificate`]: a self-signed `localhost` certificate and a
//!   TLS 1.2 acceptor that speaks the PRELOGIN-framed handshake
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_testing::{MockServer, ServerOptions, TestCertificate};
//! use tds_protocol::EncryptionLevel;
//!
//! #[tokio::test]
//! async fn test_login_only_tls() {
//!     let cert = TestCertificate::generate().unwrap();
//!     let server = MockServer::new(
//!         ServerOptions::default()
//!             .with_encryption(EncryptionLevel::Off)
//!             .with_certificate(cert.clone()),
//!     );
//!     let (client, stream) = tokio::io::duplex(64 * 1024);
//!     tokio::spawn(async move { server.accept_login(stream).await });
//!     // Log in over `client`...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod server;
pub mod tls;
pub mod tokens;

pub use server::{
    BoxedStream, LoginExchange, MockServer, MockServerError, ServerIo, ServerOptions,
    decode_sql_batch, read_batch, read_message, write_message,
};
pub use tls::TestCertificate;
pub use tokens::{MockColumn, ResponseBuilder, ScalarValue, prelogin_response};
