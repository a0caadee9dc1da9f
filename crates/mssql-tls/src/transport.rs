//! Transport that can be upgraded to TLS and reverted in place.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::client::TlsStream;

use crate::connector::TlsConnector;
use crate::error::TlsError;
use crate::tunnel::TlsTunnel;

/// A byte stream that is either plain or carries a TLS session.
///
/// The TLS variant keeps its [`TlsTunnel`] so the raw stream can be
/// recovered when encryption covers the login only.
#[derive(Debug)]
pub enum Transport<S> {
    /// Unencrypted stream.
    Plain(S),
    /// TLS session over the (now pass-through) tunnel.
    Tls(Box<TlsStream<TlsTunnel<S>>>),
    /// Stream taken out during an upgrade that did not complete.
    Detached,
}

impl<S> Transport<S> {
    /// Whether traffic is encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Revert to the raw stream, discarding the TLS session.
    ///
    /// No close_notify is sent: the server expects plain TDS packets next.
    pub fn disable_tls(&mut self) {
        *self = match std::mem::replace(self, Self::Detached) {
            Self::Tls(tls) => {
                let (tunnel, _session) = (*tls).into_inner();
                tracing::debug!("TLS disabled, transport reverted to plain");
                Self::Plain(tunnel.into_inner())
            }
            other => other,
        };
    }

    /// Unwrap the raw stream, if still reachable.
    pub fn into_inner(self) -> Option<S> {
        match self {
            Self::Plain(stream) => Some(stream),
            Self::Tls(tls) => Some((*tls).into_inner().0.into_inner()),
            Self::Detached => None,
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    /// Run the TLS handshake inside PRELOGIN packets and switch to TLS.
    ///
    /// On failure the transport is left [`Transport::Detached`].
    pub async fn enable_tls(
        &mut self,
        connector: &TlsConnector,
        server_name: &str,
        packet_size: usize,
    ) -> Result<(), TlsError> {
        let stream = match std::mem::replace(self, Self::Detached) {
            Self::Plain(stream) => stream,
            other => {
                *self = other;
                return Err(TlsError::Configuration(
                    "TLS requested on a transport that is not plain".into(),
                ));
            }
        };

        let mut tls = connector
            .connect(TlsTunnel::new(stream, packet_size), server_name)
            .await?;
        tls.get_mut().0.finish_handshake();
        *self = Self::Tls(Box::new(tls));
        Ok(())
    }
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport detached")
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for Transport<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
            Self::Detached => Poll::Ready(Err(detached())),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for Transport<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
            Self::Detached => Poll::Ready(Err(detached())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
            Self::Detached => Poll::Ready(Err(detached())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
            Self::Detached => Poll::Ready(Ok(())),
        }
    }
}
