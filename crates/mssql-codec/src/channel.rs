//! A transport paired with its packet framing state.

use bytes::{Bytes, BytesMut};
use tds_protocol::ProtocolError;
use tds_protocol::codec::utf16le_bytes_to_string;
use tds_protocol::packet::{PacketHeader, PacketType};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::CodecError;
use crate::framed::{FramedReader, FramedWriter};

/// Owns the transport and both framing halves.
///
/// All reads return payload bytes only; all writes are packetized. Integer
/// helpers are little-endian, matching the token stream.
#[derive(Debug)]
pub struct Channel<T> {
    io: T,
    reader: FramedReader,
    writer: FramedWriter,
}

impl<T> Channel<T> {
    /// Wrap `io` with packets of `packet_size` bytes.
    pub fn new(io: T, packet_size: usize) -> Self {
        Self {
            io,
            reader: FramedReader::new(packet_size),
            writer: FramedWriter::new(packet_size),
        }
    }

    /// Shared access to the transport.
    pub fn get_ref(&self) -> &T {
        &self.io
    }

    /// Mutable access to the transport, bypassing framing.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.io
    }

    /// Consume the channel, returning the transport.
    pub fn into_inner(self) -> T {
        self.io
    }

    /// Current outgoing packet size.
    pub fn packet_size(&self) -> usize {
        self.writer.packet_size()
    }

    /// Apply a negotiated packet size to both halves.
    pub fn set_packet_size(&mut self, packet_size: usize) -> Result<(), ProtocolError> {
        self.writer.set_packet_size(packet_size)?;
        self.reader.set_buffer_size(packet_size);
        Ok(())
    }

    /// Set the type of outgoing packets.
    pub fn set_packet_type(&mut self, packet_type: PacketType) {
        self.writer.set_packet_type(packet_type);
    }

    /// Payload bytes left in the current incoming packet.
    pub fn packet_data_left(&self) -> usize {
        self.reader.packet_data_left()
    }

    /// Whether the incoming message has been read to its end.
    pub fn is_message_complete(&self) -> bool {
        self.reader.is_message_complete()
    }

    /// Header of the most recent incoming packet.
    pub fn last_header(&self) -> Option<&PacketHeader> {
        self.reader.last_header()
    }
}

impl<T: AsyncWrite + Unpin> Channel<T> {
    /// Append bytes to the outgoing message.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.writer.write(&mut self.io, bytes).await
    }

    /// Append one byte.
    pub async fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.write(&[value]).await
    }

    /// Append a little-endian `u16`.
    pub async fn write_u16_le(&mut self, value: u16) -> Result<(), CodecError> {
        self.write(&value.to_le_bytes()).await
    }

    /// Append a little-endian `u32`.
    pub async fn write_u32_le(&mut self, value: u32) -> Result<(), CodecError> {
        self.write(&value.to_le_bytes()).await
    }

    /// Send the buffered packet; `hard` ends the message.
    pub async fn flush(&mut self, hard: bool) -> Result<(), CodecError> {
        self.writer.flush(&mut self.io, hard).await
    }

    /// Send `payload` as one complete message of `packet_type`.
    pub async fn write_message(
        &mut self,
        packet_type: PacketType,
        payload: &[u8],
    ) -> Result<(), CodecError> {
        self.set_packet_type(packet_type);
        self.write(payload).await?;
        self.flush(true).await
    }
}

impl<T: AsyncRead + Unpin> Channel<T> {
    /// Fill `dst` with payload bytes.
    pub async fn read_exact(&mut self, dst: &mut [u8]) -> Result<(), CodecError> {
        self.reader.read(&mut self.io, dst).await
    }

    /// Read `n` payload bytes.
    pub async fn read_bytes(&mut self, n: usize) -> Result<Bytes, CodecError> {
        let mut buf = vec![0u8; n];
        self.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Skip `n` payload bytes.
    pub async fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.reader.skip(&mut self.io, n).await
    }

    /// Next payload byte, left unconsumed.
    pub async fn peek_u8(&mut self) -> Result<u8, CodecError> {
        self.reader.peek_u8(&mut self.io).await
    }

    /// Drop the rest of the current incoming packet.
    pub async fn reset_packet(&mut self) -> Result<(), CodecError> {
        self.reader.reset_packet(&mut self.io).await
    }

    /// Read the remainder of the current message.
    ///
    /// Starts a new message if the previous one was fully consumed.
    pub async fn read_message(&mut self) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::new();
        loop {
            // Pull in the next packet when the current one is spent.
            self.peek_u8().await?;
            let n = self.packet_data_left();
            let start = out.len();
            out.resize(start + n, 0);
            self.read_exact(&mut out[start..]).await?;
            if self.is_message_complete() {
                return Ok(out.freeze());
            }
        }
    }

    async fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Read one byte.
    pub async fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>().await?[0])
    }

    /// Read a little-endian `u16`.
    pub async fn read_u16_le(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.read_array().await?))
    }

    /// Read a little-endian `u32`.
    pub async fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array().await?))
    }

    /// Read a little-endian `i32`.
    pub async fn read_i32_le(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.read_array().await?))
    }

    /// Read a little-endian `u64`.
    pub async fn read_u64_le(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.read_array().await?))
    }

    /// Read a little-endian `i64`.
    pub async fn read_i64_le(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.read_array().await?))
    }

    /// Read `chars` UTF-16LE code units as a string.
    pub async fn read_utf16(&mut self, chars: usize) -> Result<String, CodecError> {
        let raw = self.read_bytes(chars * 2).await?;
        Ok(utf16le_bytes_to_string(&raw)?)
    }

    /// Read a string with a 1-byte character count.
    pub async fn read_b_varchar(&mut self) -> Result<String, CodecError> {
        let chars = self.read_u8().await?;
        self.read_utf16(usize::from(chars)).await
    }

    /// Read a string with a 2-byte character count.
    pub async fn read_us_varchar(&mut self) -> Result<String, CodecError> {
        let chars = self.read_u16_le().await?;
        self.read_utf16(usize::from(chars)).await
    }
}
