//! Authentication error types.

use thiserror::Error;

/// Errors raised by credential providers.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The credentials cannot be used.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The provider could not produce credentials.
    #[error("credential provider failed: {0}")]
    Provider(String),
}
