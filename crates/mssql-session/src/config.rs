//! Session configuration.

use std::time::Duration;

use mssql_codec::{MAX_NEGOTIATED_PACKET_SIZE, MIN_PACKET_SIZE};
use mssql_tls::TlsConfig;
use tds_protocol::{DEFAULT_PACKET_SIZE, EncryptionLevel, FeatureRequests, TdsVersion, TraceId};

use crate::error::Error;

/// Everything a session needs to connect and log in.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 1433).
    pub port: u16,

    /// Packet size requested at login (default: 4096).
    pub packet_size: usize,

    /// Encryption requested in PRELOGIN.
    ///
    /// `Off` (the default) still encrypts the login exchange when the server
    /// supports TLS.
    pub encryption: EncryptionLevel,

    /// Application name (shown in SQL Server management tools).
    pub application_name: String,

    /// Client machine name sent in LOGIN7.
    pub client_hostname: String,

    /// Initial database.
    pub database: Option<String>,

    /// Initial language.
    pub language: Option<String>,

    /// Client process id sent in LOGIN7.
    pub client_pid: u32,

    /// Thread id sent in PRELOGIN.
    pub thread_id: u32,

    /// Connection and activity ids sent in PRELOGIN.
    pub trace_id: TraceId,

    /// Feature extensions requested in LOGIN7.
    pub requested_features: FeatureRequests,

    /// TLS settings for the login handshake.
    pub tls: TlsConfig,

    /// TDS version requested in LOGIN7.
    pub tds_version: TdsVersion,

    /// Deadline for establishing the TCP connection.
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            packet_size: DEFAULT_PACKET_SIZE,
            encryption: EncryptionLevel::Off,
            application_name: "mssql-session".to_string(),
            client_hostname: String::new(),
            database: None,
            language: None,
            client_pid: std::process::id(),
            thread_id: 1234,
            trace_id: TraceId {
                activity_sequence: 123,
                ..TraceId::default()
            },
            requested_features: FeatureRequests::default(),
            tls: TlsConfig::default(),
            tds_version: TdsVersion::V7_4,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an ADO.NET-style connection string.
    ///
    /// ```text
    /// Server=db01,1433;Database=sales;Encrypt=true;TrustServerCertificate=true;
    /// ```
    ///
    /// Credentials are not part of the configuration; pass a
    /// [`mssql_auth::CredentialProvider`] to the login instead.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "host" => {
                    let value = value.strip_prefix("tcp:").unwrap_or(value);
                    if let Some((host, port)) = value.split_once(',') {
                        config.host = host.to_string();
                        config.port = parse_port(port)?;
                    } else {
                        config.host = value.to_string();
                    }
                }
                "port" => config.port = parse_port(value)?,
                "database" | "initial catalog" => config.database = Some(value.to_string()),
                "application name" | "app" => config.application_name = value.to_string(),
                "workstation id" | "wsid" => config.client_hostname = value.to_string(),
                "language" | "current language" => config.language = Some(value.to_string()),
                "packet size" => {
                    let size = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid packet size: {value}")))?;
                    config = config.packet_size(size);
                }
                "encrypt" => {
                    config.encryption = match value.to_lowercase().as_str() {
                        "true" | "yes" | "mandatory" | "strict" => EncryptionLevel::On,
                        "false" | "no" | "optional" => EncryptionLevel::Off,
                        "not_supported" | "no_tls" => EncryptionLevel::NotSupported,
                        _ => return Err(Error::Config(format!("invalid encrypt value: {value}"))),
                    };
                }
                "trustservercertificate" | "trust server certificate" => {
                    let trust = parse_bool(value)?;
                    config.tls = config.tls.trust_server_certificate(trust);
                }
                "hostnameincertificate" | "host name in certificate" => {
                    config.tls = config.tls.with_server_name(value);
                }
                "connect timeout" | "connection timeout" | "timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                _ => {
                    tracing::debug!(key, "ignoring unknown connection string option");
                }
            }
        }

        if config.host.is_empty() {
            return Err(Error::Config("server is required".into()));
        }
        Ok(config)
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the requested packet size, clamped to 512..=32767.
    #[must_use]
    pub fn packet_size(mut self, size: usize) -> Self {
        self.packet_size = size.clamp(MIN_PACKET_SIZE, MAX_NEGOTIATED_PACKET_SIZE);
        self
    }

    /// Set the PRELOGIN encryption level.
    #[must_use]
    pub fn encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the client machine name.
    #[must_use]
    pub fn client_hostname(mut self, name: impl Into<String>) -> Self {
        self.client_hostname = name.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the initial language.
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the client process id.
    #[must_use]
    pub fn client_pid(mut self, pid: u32) -> Self {
        self.client_pid = pid;
        self
    }

    /// Set the PRELOGIN thread id.
    #[must_use]
    pub fn thread_id(mut self, thread_id: u32) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Set the PRELOGIN trace ids.
    #[must_use]
    pub fn trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Set the LOGIN7 feature requests.
    #[must_use]
    pub fn requested_features(mut self, features: FeatureRequests) -> Self {
        self.requested_features = features;
        self
    }

    /// Set the TLS configuration.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set trust server certificate option.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.tls = self.tls.trust_server_certificate(trust);
        self
    }

    /// Set the TDS version requested in LOGIN7.
    #[must_use]
    pub fn tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set the TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Name to validate the server certificate against.
    #[must_use]
    pub fn tls_server_name(&self) -> &str {
        self.tls.server_name.as_deref().unwrap_or(&self.host)
    }
}

fn parse_port(value: &str) -> Result<u16, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid port: {value}")))
}

fn parse_bool(value: &str) -> Result<bool, Error> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Config(format!("invalid boolean: {value}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 1433);
        assert_eq!(config.packet_size, 4096);
        assert_eq!(config.encryption, EncryptionLevel::Off);
        assert_eq!(config.thread_id, 1234);
        assert_eq!(config.requested_features, FeatureRequests::default());
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_packet_size_clamped() {
        assert_eq!(Config::new().packet_size(100).packet_size, 512);
        assert_eq!(Config::new().packet_size(65_000).packet_size, 32_767);
        assert_eq!(Config::new().packet_size(8192).packet_size, 8192);
    }

    #[test]
    fn test_tls_server_name_falls_back_to_host() {
        let config = Config::new().host("db01.internal");
        assert_eq!(config.tls_server_name(), "db01.internal");
        let config = config.tls(TlsConfig::new().with_server_name("db01.example.com"));
        assert_eq!(config.tls_server_name(), "db01.example.com");
    }

    #[test]
    fn test_connection_string() {
        let config = Config::from_connection_string(
            "Server=tcp:db01,14330;Database=sales;Application Name=etl;\
             Encrypt=true;TrustServerCertificate=yes;Packet Size=16384;Connect Timeout=5",
        )
        .unwrap();
        assert_eq!(config.host, "db01");
        assert_eq!(config.port, 14330);
        assert_eq!(config.database.as_deref(), Some("sales"));
        assert_eq!(config.application_name, "etl");
        assert_eq!(config.encryption, EncryptionLevel::On);
        assert!(config.tls.trust_server_certificate);
        assert_eq!(config.packet_size, 16384);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_connection_string_errors() {
        assert!(matches!(
            Config::from_connection_string("Server=db;Port=http"),
            Err(Error::Config(_))
        ));
        assert!(Config::from_connection_string("garbage").is_err());
        assert!(Config::from_connection_string("Encrypt=maybe").is_err());
        assert!(Config::from_connection_string("Server=").is_err());
    }
}
