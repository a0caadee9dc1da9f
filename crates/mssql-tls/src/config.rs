//! TLS settings for the login handshake.

use rustls::pki_types::CertificateDer;

/// How the server certificate is checked and which TLS versions are offered.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    /// Accept any server certificate. Logged as a warning when used.
    pub trust_server_certificate: bool,

    /// Extra trust anchors. When empty, the Mozilla root set is used.
    pub root_certificates: Vec<CertificateDer<'static>>,

    /// Name checked against the certificate instead of the connect host.
    pub server_name: Option<String>,

    /// Lowest TLS version offered.
    pub min_protocol_version: TlsVersion,

    /// Highest TLS version offered.
    pub max_protocol_version: TlsVersion,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            trust_server_certificate: false,
            root_certificates: Vec::new(),
            server_name: None,
            min_protocol_version: TlsVersion::Tls12,
            max_protocol_version: TlsVersion::Tls13,
        }
    }
}

impl TlsConfig {
    /// Default settings: full validation, TLS 1.2 through 1.3.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip certificate validation.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Trust an additional root certificate.
    #[must_use]
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Validate the certificate against `name`.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Set the lowest TLS version.
    #[must_use]
    pub fn min_protocol_version(mut self, version: TlsVersion) -> Self {
        self.min_protocol_version = version;
        self
    }

    /// Set the highest TLS version.
    #[must_use]
    pub fn max_protocol_version(mut self, version: TlsVersion) -> Self {
        self.max_protocol_version = version;
        self
    }

    /// Versions between the configured bounds, falling back to TLS 1.2 when
    /// the bounds are inverted.
    #[must_use]
    pub fn protocol_versions(&self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        let mut versions: Vec<_> = [TlsVersion::Tls12, TlsVersion::Tls13]
            .into_iter()
            .filter(|v| (self.min_protocol_version..=self.max_protocol_version).contains(v))
            .map(TlsVersion::to_rustls)
            .collect();
        if versions.is_empty() {
            versions.push(TlsVersion::Tls12.to_rustls());
        }
        versions
    }
}

/// TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TlsVersion {
    /// TLS 1.2
    #[default]
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// The rustls equivalent.
    #[must_use]
    pub fn to_rustls(self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            Self::Tls12 => &rustls::version::TLS12,
            Self::Tls13 => &rustls::version::TLS13,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_range() {
        let config = TlsConfig::new();
        assert_eq!(config.protocol_versions().len(), 2);

        let only13 = TlsConfig::new().min_protocol_version(TlsVersion::Tls13);
        assert_eq!(only13.protocol_versions().len(), 1);
        assert_eq!(
            only13.protocol_versions()[0].version,
            rustls::ProtocolVersion::TLSv1_3
        );

        let inverted = TlsConfig::new()
            .min_protocol_version(TlsVersion::Tls13)
            .max_protocol_version(TlsVersion::Tls12);
        assert_eq!(
            inverted.protocol_versions()[0].version,
            rustls::ProtocolVersion::TLSv1_2
        );
    }
}
