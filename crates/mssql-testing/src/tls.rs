//! Server side of the TLS-in-PRELOGIN handshake.
//!
//! The acceptor offers TLS 1.2 only. A TLS 1.3 server sends session tickets
//! after the handshake, which would land on the plain stream once a
//! login-only client drops TLS.

use std::sync::Arc;

use mssql_tls::TlsTunnel;
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

use crate::server::{MockServerError, Result};

/// A self-signed certificate for `localhost` and an acceptor serving it.
#[derive(Clone)]
pub struct TestCertificate {
    certificate: CertificateDer<'static>,
    acceptor: TlsAcceptor,
}

impl std::fmt::Debug for TestCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCertificate")
            .field("len", &self.certificate.len())
            .finish_non_exhaustive()
    }
}

impl TestCertificate {
    /// Generate a fresh key pair and certificate.
    pub fn generate() -> Result<Self> {
        let key_pair = rcgen::KeyPair::generate().map_err(tls_error)?;
        let certificate = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .and_then(|params| params.self_signed(&key_pair))
            .map_err(tls_error)?
            .der()
            .clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS12])
            .map_err(tls_error)?
            .with_no_client_auth()
            .with_single_cert(vec![certificate.clone()], key)
            .map_err(tls_error)?;

        Ok(Self {
            certificate,
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// The certificate, for a client trust store.
    #[must_use]
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// Run the handshake with PRELOGIN framing, then switch the tunnel to
    /// pass-through.
    pub async fn accept<S>(&self, stream: S, packet_size: usize) -> Result<TlsStream<TlsTunnel<S>>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut tls = self
            .acceptor
            .accept(TlsTunnel::new(stream, packet_size))
            .await?;
        tls.get_mut().0.finish_handshake();
        tracing::debug!("mock server TLS handshake complete");
        Ok(tls)
    }
}

fn tls_error(e: impl std::fmt::Display) -> MockServerError {
    MockServerError::Tls(e.to_string())
}
