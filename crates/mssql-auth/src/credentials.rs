//! Credentials for SQL Server authentication.

use std::borrow::Cow;

use bytes::Bytes;

use crate::error::AuthError;
use crate::sql_auth::obfuscate_password;

/// Supplies the login name and the already-obfuscated password.
///
/// The password bytes go into LOGIN7 verbatim, so implementations can keep
/// the clear text out of the connection code entirely.
pub trait CredentialProvider: Send + Sync {
    /// Login name.
    fn username(&self) -> Result<Cow<'_, str>, AuthError>;

    /// Password in LOGIN7 wire form (see [`obfuscate_password`]).
    fn obfuscated_password(&self) -> Result<Bytes, AuthError>;
}

/// Username and password for SQL Server authentication.
#[derive(Clone)]
pub struct SqlCredentials {
    username: Cow<'static, str>,
    password: Cow<'static, str>,
}

impl SqlCredentials {
    /// Create credentials.
    pub fn new(
        username: impl Into<Cow<'static, str>>,
        password: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl CredentialProvider for SqlCredentials {
    fn username(&self) -> Result<Cow<'_, str>, AuthError> {
        if self.username.is_empty() {
            return Err(AuthError::InvalidCredentials("empty username".into()));
        }
        Ok(Cow::Borrowed(&self.username))
    }

    fn obfuscated_password(&self) -> Result<Bytes, AuthError> {
        Ok(obfuscate_password(&self.password))
    }
}

impl std::fmt::Debug for SqlCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[cfg(feature = "zeroize")]
impl Drop for SqlCredentials {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        if let Cow::Owned(password) = &mut self.password {
            password.zeroize();
        }
    }
}
