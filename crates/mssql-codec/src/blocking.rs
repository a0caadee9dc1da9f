//! Adapter presenting a blocking stream as a tokio transport.
//!
//! Every poll performs the blocking call inline and is always ready, so the
//! async framing code can be driven by a current-thread runtime over a plain
//! `std::net::TcpStream` (or any `Read + Write`).

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A blocking `Read + Write` stream exposed as `AsyncRead + AsyncWrite`.
#[derive(Debug)]
pub struct BlockingIo<S> {
    inner: S,
}

impl<S> BlockingIo<S> {
    /// Wrap a blocking stream.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Shared access to the stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Mutable access to the stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Unwrap the stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn retry_interrupted<R>(mut op: impl FnMut() -> io::Result<R>) -> io::Result<R> {
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

impl<S: Read + Unpin> AsyncRead for BlockingIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = retry_interrupted(|| this.inner.read(buf.initialize_unfilled()))?;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl<S: Write + Unpin> AsyncWrite for BlockingIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        Poll::Ready(retry_interrupted(|| this.inner.write(buf)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Poll::Ready(retry_interrupted(|| this.inner.flush()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}
