//! # mssql-auth
//!
//! SQL Server authentication inputs for LOGIN7.
//!
//! A [`CredentialProvider`] yields the login name and the password in its
//! obfuscated wire form. [`SqlCredentials`] is the username/password
//! implementation; [`obfuscate_password`] is the transform itself.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod credentials;
pub mod error;
pub mod sql_auth;

pub use credentials::{CredentialProvider, SqlCredentials};
pub use error::AuthError;
pub use sql_auth::{deobfuscate_password, obfuscate_password};
