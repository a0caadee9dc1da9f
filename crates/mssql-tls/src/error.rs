//! TLS error types.

use thiserror::Error;

/// Errors raised while setting up or running the TLS handshake.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The handshake did not complete.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// The name to verify is not a valid DNS name or IP address.
    #[error("invalid server name for certificate validation: {0}")]
    InvalidServerName(String),

    /// A configured root certificate was rejected.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Unusable configuration.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// Transport failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from rustls.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}
