//! Payload-level framing over fixed-size TDS packets.
//!
//! [`FramedWriter`] turns an arbitrary-length logical message into physical
//! packets; [`FramedReader`] hands back payload bytes only, crossing packet
//! boundaries as needed. Neither owns the transport: every I/O call takes it
//! by `&mut`, so the transport can be swapped (for TLS) between calls while
//! the framing state survives.
//!
//! Both halves keep a fixed buffer sized to the negotiated packet size. The
//! reader streams payload through its buffer and compacts it when a header
//! would straddle the end, so it never grows and never needs a whole packet
//! in memory at once.

use tds_protocol::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};
use tds_protocol::ProtocolError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CodecError;

/// Smallest packet size the server accepts.
pub const MIN_PACKET_SIZE: usize = 512;

/// Largest negotiable packet size.
pub const MAX_NEGOTIATED_PACKET_SIZE: usize = 32767;

/// Buffers outgoing bytes and emits them as TDS packets.
#[derive(Debug)]
pub struct FramedWriter {
    buf: Vec<u8>,
    cursor: usize,
    packet_type: Option<PacketType>,
    packet_number: u8,
}

impl FramedWriter {
    /// Create a writer for packets of `packet_size` bytes.
    #[must_use]
    pub fn new(packet_size: usize) -> Self {
        Self {
            buf: vec![0u8; clamp_packet_size(packet_size)],
            cursor: PACKET_HEADER_SIZE,
            packet_type: None,
            packet_number: 1,
        }
    }

    /// Packet size in bytes, header included.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.buf.len()
    }

    /// Bytes buffered for the current packet, header included.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.cursor
    }

    /// Set the type of the packets that follow.
    pub fn set_packet_type(&mut self, packet_type: PacketType) {
        self.packet_type = Some(packet_type);
    }

    /// Current packet type, if set.
    #[must_use]
    pub fn packet_type(&self) -> Option<PacketType> {
        self.packet_type
    }

    /// Resize the packet buffer. Only allowed between messages.
    pub fn set_packet_size(&mut self, packet_size: usize) -> Result<(), ProtocolError> {
        if self.cursor != PACKET_HEADER_SIZE {
            return Err(ProtocolError::BufferExhausted(
                "packet size changed with data buffered",
            ));
        }
        self.buf.resize(clamp_packet_size(packet_size), 0);
        Ok(())
    }

    /// Append bytes, soft-flushing full packets as needed.
    pub async fn write<T>(&mut self, io: &mut T, mut bytes: &[u8]) -> Result<(), CodecError>
    where
        T: AsyncWrite + Unpin,
    {
        while !bytes.is_empty() {
            if self.cursor == self.buf.len() {
                self.flush(io, false).await?;
            }
            let n = bytes.len().min(self.buf.len() - self.cursor);
            self.buf[self.cursor..self.cursor + n].copy_from_slice(&bytes[..n]);
            self.cursor += n;
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Send the buffered packet.
    ///
    /// A hard flush marks end of message, flushes the transport and restarts
    /// packet numbering; a soft flush sends a continuation packet.
    pub async fn flush<T>(&mut self, io: &mut T, hard: bool) -> Result<(), CodecError>
    where
        T: AsyncWrite + Unpin,
    {
        let packet_type = self.packet_type.ok_or(ProtocolError::PacketTypeNotSet)?;
        let status = if hard {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::BATCH
        };
        let header = PacketHeader::new(packet_type, status, self.cursor as u16)
            .with_packet_id(self.packet_number);
        header.write_into(&mut self.buf[..PACKET_HEADER_SIZE]);

        let length = self.cursor;
        self.cursor = PACKET_HEADER_SIZE;
        tracing::trace!(
            packet_type = ?packet_type,
            length,
            packet_id = self.packet_number,
            hard,
            "flushing TDS packet"
        );

        if hard {
            self.packet_number = 1;
        } else {
            self.packet_number = self.packet_number.wrapping_add(1);
        }

        io.write_all(&self.buf[..length]).await?;
        if hard {
            io.flush().await?;
        }
        Ok(())
    }
}

/// Reads payload bytes out of a stream of TDS packets.
#[derive(Debug)]
pub struct FramedReader {
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
    packet_left: usize,
    last_header: Option<PacketHeader>,
}

impl FramedReader {
    /// Create a reader with a buffer of `buffer_size` bytes.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buf: vec![0u8; clamp_packet_size(buffer_size)],
            pos: 0,
            filled: 0,
            packet_left: 0,
            last_header: None,
        }
    }

    /// Payload bytes left in the current packet.
    #[must_use]
    pub fn packet_data_left(&self) -> usize {
        self.packet_left
    }

    /// Header of the most recent packet.
    #[must_use]
    pub fn last_header(&self) -> Option<&PacketHeader> {
        self.last_header.as_ref()
    }

    /// Whether the last packet ended a message and has been fully consumed.
    #[must_use]
    pub fn is_message_complete(&self) -> bool {
        self.packet_left == 0
            && self
                .last_header
                .is_some_and(|h| h.status.contains(PacketStatus::END_OF_MESSAGE))
    }

    /// Resize the buffer. Bytes already buffered are kept, so the buffer
    /// never shrinks below them.
    pub fn set_buffer_size(&mut self, buffer_size: usize) {
        self.compact();
        let size = clamp_packet_size(buffer_size).max(self.filled);
        self.buf.resize(size, 0);
    }

    /// Buffer capacity in bytes.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buf.len()
    }

    /// Discard what is left of the current packet and forget its header, so
    /// the next read starts on a packet boundary.
    pub async fn reset_packet<T>(&mut self, io: &mut T) -> Result<(), CodecError>
    where
        T: AsyncRead + Unpin,
    {
        while self.packet_left > 0 {
            if self.pos == self.filled {
                self.fill(io).await?;
            }
            let n = self.packet_left.min(self.filled - self.pos);
            self.pos += n;
            self.packet_left -= n;
        }
        self.last_header = None;
        Ok(())
    }

    /// Fill `dst` with payload bytes, reading as many packets as needed.
    pub async fn read<T>(&mut self, io: &mut T, dst: &mut [u8]) -> Result<(), CodecError>
    where
        T: AsyncRead + Unpin,
    {
        let mut done = 0;
        while done < dst.len() {
            if self.packet_left == 0 {
                self.next_packet(io).await?;
                continue;
            }
            if self.pos == self.filled {
                self.fill(io).await?;
            }
            let n = self
                .packet_left
                .min(self.filled - self.pos)
                .min(dst.len() - done);
            dst[done..done + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            self.packet_left -= n;
            done += n;
        }
        Ok(())
    }

    /// Skip `n` payload bytes.
    pub async fn skip<T>(&mut self, io: &mut T, mut n: usize) -> Result<(), CodecError>
    where
        T: AsyncRead + Unpin,
    {
        while n > 0 {
            if self.packet_left == 0 {
                self.next_packet(io).await?;
                continue;
            }
            if self.pos == self.filled {
                self.fill(io).await?;
            }
            let step = self.packet_left.min(self.filled - self.pos).min(n);
            self.pos += step;
            self.packet_left -= step;
            n -= step;
        }
        Ok(())
    }

    /// Peek at the next payload byte without consuming it.
    pub async fn peek_u8<T>(&mut self, io: &mut T) -> Result<u8, CodecError>
    where
        T: AsyncRead + Unpin,
    {
        while self.packet_left == 0 {
            self.next_packet(io).await?;
        }
        if self.pos == self.filled {
            self.fill(io).await?;
        }
        Ok(self.buf[self.pos])
    }

    /// Decode the next packet header, skipping empty packets.
    async fn next_packet<T>(&mut self, io: &mut T) -> Result<(), CodecError>
    where
        T: AsyncRead + Unpin,
    {
        if self.buf.len() - self.pos < PACKET_HEADER_SIZE {
            self.compact();
        }
        while self.filled - self.pos < PACKET_HEADER_SIZE {
            let n = io.read(&mut self.buf[self.filled..]).await?;
            if n == 0 {
                let have = self.filled - self.pos;
                return Err(if have == 0 {
                    ProtocolError::ConnectionClosed
                } else {
                    ProtocolError::ShortHeader(have)
                }
                .into());
            }
            self.filled += n;
        }

        let mut raw = &self.buf[self.pos..self.pos + PACKET_HEADER_SIZE];
        let header = PacketHeader::decode(&mut raw)?;
        self.pos += PACKET_HEADER_SIZE;
        self.packet_left = header.payload_length();
        self.last_header = Some(header);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = header.length,
            packet_id = header.packet_id,
            eom = header.is_end_of_message(),
            "decoded TDS packet header"
        );
        Ok(())
    }

    /// Read more bytes from the transport into the buffer.
    async fn fill<T>(&mut self, io: &mut T) -> Result<(), CodecError>
    where
        T: AsyncRead + Unpin,
    {
        if self.filled == self.buf.len() {
            self.compact();
        }
        let n = io.read(&mut self.buf[self.filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed.into());
        }
        self.filled += n;
        Ok(())
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
        }
    }
}

fn clamp_packet_size(size: usize) -> usize {
    size.clamp(MIN_PACKET_SIZE, MAX_NEGOTIATED_PACKET_SIZE)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn round_trip(len: usize, packet_size: usize) -> (Vec<u8>, Vec<u8>) {
        let data = payload(len);
        let mut wire = Vec::new();
        let mut writer = FramedWriter::new(packet_size);
        writer.set_packet_type(PacketType::SqlBatch);
        writer.write(&mut wire, &data).await.unwrap();
        writer.flush(&mut wire, true).await.unwrap();

        let mut reader = FramedReader::new(packet_size);
        let mut out = vec![0u8; len];
        let mut src = &wire[..];
        reader.read(&mut src, &mut out).await.unwrap();
        assert_eq!(reader.packet_data_left(), 0);
        assert!(reader.is_message_complete());
        (data, out)
    }

    #[tokio::test]
    async fn test_round_trip_single_byte() {
        let (data, out) = round_trip(1, 512).await;
        assert_eq!(data, out);
    }

    #[tokio::test]
    async fn test_round_trip_exactly_one_packet() {
        let (data, out) = round_trip(512 - PACKET_HEADER_SIZE, 512).await;
        assert_eq!(data, out);
    }

    #[tokio::test]
    async fn test_round_trip_several_packets() {
        let (data, out) = round_trip(5000, 512).await;
        assert_eq!(data, out);
    }

    #[tokio::test]
    async fn test_packet_headers_on_the_wire() {
        let mut wire = Vec::new();
        let mut writer = FramedWriter::new(512);
        writer.set_packet_type(PacketType::Tds7Login);
        writer.write(&mut wire, &payload(1200)).await.unwrap();
        writer.flush(&mut wire, true).await.unwrap();

        // 504 + 504 + 192 payload bytes.
        assert_eq!(wire.len(), 1200 + 3 * PACKET_HEADER_SIZE);
        let first = PacketHeader::decode(&mut &wire[..8]).unwrap();
        assert_eq!(first.status, PacketStatus::BATCH);
        assert_eq!(wire[1], 0x04);
        assert_eq!(first.length, 512);
        assert_eq!(first.packet_id, 1);
        let second = PacketHeader::decode(&mut &wire[512..520]).unwrap();
        assert_eq!(second.status, PacketStatus::BATCH);
        assert_eq!(second.packet_id, 2);
        let last = PacketHeader::decode(&mut &wire[1024..1032]).unwrap();
        assert!(last.is_end_of_message());
        assert_eq!(last.length, 200);
        assert_eq!(last.packet_id, 3);
    }

    #[tokio::test]
    async fn test_packet_number_resets_after_hard_flush() {
        let mut wire = Vec::new();
        let mut writer = FramedWriter::new(512);
        writer.set_packet_type(PacketType::SqlBatch);
        writer.write(&mut wire, &payload(600)).await.unwrap();
        writer.flush(&mut wire, true).await.unwrap();
        let start = wire.len();
        writer.write(&mut wire, b"x").await.unwrap();
        writer.flush(&mut wire, true).await.unwrap();
        let header = PacketHeader::decode(&mut &wire[start..start + 8]).unwrap();
        assert_eq!(header.packet_id, 1);
    }

    #[tokio::test]
    async fn test_flush_without_packet_type() {
        let mut wire = Vec::new();
        let mut writer = FramedWriter::new(512);
        let err = writer.flush(&mut wire, true).await.unwrap_err();
        assert!(matches!(
            err,
            CodecError::Protocol(ProtocolError::PacketTypeNotSet)
        ));
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_header_split_across_reads() {
        let mut header = [0u8; 8];
        PacketHeader::new(PacketType::TabularResult, PacketStatus::END_OF_MESSAGE, 11)
            .write_into(&mut header);
        let mut io = tokio_test::io::Builder::new()
            .read(&header[..3])
            .read(&header[3..])
            .read(b"ab")
            .read(b"c")
            .build();

        let mut reader = FramedReader::new(512);
        let mut out = [0u8; 3];
        reader.read(&mut io, &mut out).await.unwrap();
        assert_eq!(&out, b"abc");
        assert!(reader.is_message_complete());
    }

    #[tokio::test]
    async fn test_zero_read_is_connection_closed() {
        let mut reader = FramedReader::new(512);
        let mut out = [0u8; 1];
        let err = reader.read(&mut &b""[..], &mut out).await.unwrap_err();
        assert!(err.is_connection_closed());
    }

    #[tokio::test]
    async fn test_partial_header_is_short_header() {
        let mut reader = FramedReader::new(512);
        let mut out = [0u8; 1];
        let err = reader
            .read(&mut &[0x04u8, 0x01, 0x00][..], &mut out)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::Protocol(ProtocolError::ShortHeader(3))
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_connection_closed() {
        let mut wire = vec![0u8; 8];
        PacketHeader::new(PacketType::TabularResult, PacketStatus::END_OF_MESSAGE, 20)
            .write_into(&mut wire);
        wire.extend_from_slice(b"abc");
        let mut reader = FramedReader::new(512);
        let mut out = [0u8; 12];
        let err = reader.read(&mut &wire[..], &mut out).await.unwrap_err();
        assert!(err.is_connection_closed());
    }

    #[tokio::test]
    async fn test_packets_larger_than_buffer_stream_through() {
        // Writer uses 4096-byte packets, reader a 512-byte buffer.
        let data = payload(10_000);
        let mut wire = Vec::new();
        let mut writer = FramedWriter::new(4096);
        writer.set_packet_type(PacketType::TabularResult);
        writer.write(&mut wire, &data).await.unwrap();
        writer.flush(&mut wire, true).await.unwrap();

        let mut reader = FramedReader::new(512);
        let mut out = vec![0u8; data.len()];
        reader.read(&mut &wire[..], &mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_reset_packet_discards_rest() {
        let mut wire = Vec::new();
        let mut writer = FramedWriter::new(512);
        writer.set_packet_type(PacketType::TabularResult);
        writer.write(&mut wire, b"first").await.unwrap();
        writer.flush(&mut wire, true).await.unwrap();
        writer.write(&mut wire, b"second").await.unwrap();
        writer.flush(&mut wire, true).await.unwrap();

        let mut src = &wire[..];
        let mut reader = FramedReader::new(512);
        let mut two = [0u8; 2];
        reader.read(&mut src, &mut two).await.unwrap();
        assert_eq!(reader.packet_data_left(), 3);
        reader.reset_packet(&mut src).await.unwrap();
        assert_eq!(reader.packet_data_left(), 0);

        let mut six = [0u8; 6];
        reader.read(&mut src, &mut six).await.unwrap();
        assert_eq!(&six, b"second");
    }

    #[tokio::test]
    async fn test_set_packet_size_rejected_mid_message() {
        let mut wire = Vec::new();
        let mut writer = FramedWriter::new(4096);
        writer.set_packet_type(PacketType::SqlBatch);
        writer.write(&mut wire, b"abc").await.unwrap();
        assert!(writer.set_packet_size(8192).is_err());
        writer.flush(&mut wire, true).await.unwrap();
        writer.set_packet_size(8192).unwrap();
        assert_eq!(writer.packet_size(), 8192);
    }

    proptest::proptest! {
        #[test]
        fn prop_round_trip_any_length(len in 1usize..6000, packet_size in 512usize..2048) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (data, out) = rt.block_on(round_trip(len, packet_size));
            proptest::prop_assert_eq!(data, out);
        }
    }
}
