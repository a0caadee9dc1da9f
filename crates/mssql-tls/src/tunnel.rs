//! PRELOGIN encapsulation of the TLS handshake.
//!
//! While the handshake runs, every TLS record travels inside TDS packets of
//! type PRELOGIN (0x12). [`TlsTunnel`] adds and strips those packet headers
//! until [`TlsTunnel::finish_handshake`] is called, after which it is a plain
//! pass-through and the TLS session talks to the transport directly.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const HEADER_SIZE: usize = 8;
const PRELOGIN: u8 = 0x12;
// Continuation chunks carry a cleared status, not BATCH.
const STATUS_NORMAL: u8 = 0x00;
const STATUS_EOM: u8 = 0x01;

/// Stream wrapper carrying TLS handshake traffic in PRELOGIN packets.
#[derive(Debug)]
pub struct TlsTunnel<S> {
    stream: S,
    encapsulate: bool,
    packet_size: usize,

    header: [u8; HEADER_SIZE],
    header_pos: usize,
    read_left: usize,

    // One outgoing packet being written, and the input bytes it covers.
    out: Vec<u8>,
    out_pos: usize,
    out_accepted: usize,
}

impl<S> TlsTunnel<S> {
    /// Wrap `stream`, packetizing into `packet_size`-byte packets.
    pub fn new(stream: S, packet_size: usize) -> Self {
        Self {
            stream,
            encapsulate: true,
            packet_size: packet_size.max(HEADER_SIZE + 1),
            header: [0u8; HEADER_SIZE],
            header_pos: 0,
            read_left: 0,
            out: Vec::new(),
            out_pos: 0,
            out_accepted: 0,
        }
    }

    /// Stop encapsulating. Called once the TLS handshake has completed.
    pub fn finish_handshake(&mut self) {
        tracing::trace!("TLS tunnel switched to pass-through");
        self.encapsulate = false;
    }

    /// Whether traffic is still wrapped in PRELOGIN packets.
    pub fn is_encapsulating(&self) -> bool {
        self.encapsulate
    }

    /// Shared access to the transport.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutable access to the transport.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Unwrap the transport.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn build_packet(&mut self, buf: &[u8]) {
        let chunk = buf.len().min(self.packet_size - HEADER_SIZE);
        let status = if chunk < buf.len() {
            STATUS_NORMAL
        } else {
            STATUS_EOM
        };
        let length = (HEADER_SIZE + chunk) as u16;

        self.out.clear();
        self.out.extend_from_slice(&[PRELOGIN, status]);
        self.out.extend_from_slice(&length.to_be_bytes());
        self.out.extend_from_slice(&[0, 0, 0, 0]);
        self.out.extend_from_slice(&buf[..chunk]);
        self.out_pos = 0;
        self.out_accepted = chunk;

        tracing::trace!(chunk, status, "TLS tunnel chunk");
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TlsTunnel<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.encapsulate {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        while this.read_left == 0 {
            while this.header_pos < HEADER_SIZE {
                let mut header = ReadBuf::new(&mut this.header[this.header_pos..]);
                ready!(Pin::new(&mut this.stream).poll_read(cx, &mut header))?;
                let n = header.filled().len();
                if n == 0 {
                    // Closed; surfaced to the TLS layer as EOF.
                    return Poll::Ready(Ok(()));
                }
                this.header_pos += n;
            }
            let length = usize::from(u16::from_be_bytes([this.header[2], this.header[3]]));
            this.read_left = length.saturating_sub(HEADER_SIZE);
            this.header_pos = 0;
        }

        let max = this.read_left.min(buf.remaining());
        let mut limited = ReadBuf::new(buf.initialize_unfilled_to(max));
        ready!(Pin::new(&mut this.stream).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        buf.advance(n);
        this.read_left -= n;
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsTunnel<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if !this.encapsulate {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if this.out_accepted == 0 {
            this.build_packet(buf);
        }
        while this.out_pos < this.out.len() {
            let n = ready!(Pin::new(&mut this.stream).poll_write(cx, &this.out[this.out_pos..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.out_pos += n;
        }
        ready!(Pin::new(&mut this.stream).poll_flush(cx))?;

        let accepted = this.out_accepted;
        this.out_accepted = 0;
        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
