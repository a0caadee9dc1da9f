//! PRELOGIN and LOGIN7 construction from a [`Config`].

use mssql_auth::CredentialProvider;
use tds_protocol::{Login7, PreLogin};

use crate::config::Config;
use crate::error::Result;

/// Build the client PRELOGIN request.
#[must_use]
pub fn build_prelogin(config: &Config) -> PreLogin {
    PreLogin::new()
        .with_encryption(config.encryption)
        .with_thread_id(config.thread_id)
        .with_trace_id(config.trace_id)
}

/// Build LOGIN7 with the provider's credentials and the requested features.
pub fn build_login7(config: &Config, credentials: &dyn CredentialProvider) -> Result<Login7> {
    let username = credentials.username()?;
    let password = credentials.obfuscated_password()?;

    let mut login = Login7::new()
        .with_credentials(username.into_owned(), password)
        .with_hostname(&config.client_hostname)
        .with_app_name(&config.application_name)
        .with_server_name(&config.host)
        .with_packet_size(config.packet_size as u32)
        .with_client_pid(config.client_pid)
        .with_features(config.requested_features.extensions());
    if let Some(database) = &config.database {
        login = login.with_database(database);
    }
    if let Some(language) = &config.language {
        login = login.with_language(language);
    }
    login.tds_version = config.tds_version;
    Ok(login)
}
