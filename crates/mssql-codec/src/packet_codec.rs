//! Whole-packet codec for `tokio_util::codec`.
//!
//! The session reads payload through [`crate::FramedReader`]; this codec is
//! for the other side of the wire, where complete client packets are
//! collected into messages (see [`crate::MessageAssembler`]).

use bytes::{BufMut, Bytes, BytesMut};
use tds_protocol::ProtocolError;
use tds_protocol::packet::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// A TDS packet with header and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Payload without the header.
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet.
    #[must_use]
    pub fn new(header: PacketHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Whether this packet ends its message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// Decodes and encodes whole TDS packets.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    /// Codec accepting packets up to the protocol maximum.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Reject packets longer than `size`.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_PACKET_SIZE);
        self
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let length = u16::from_be_bytes([src[2], src[3]]);
        if usize::from(length) > self.max_packet_size {
            return Err(ProtocolError::InvalidPacketLength(length).into());
        }
        let length = usize::from(length);
        if length >= PACKET_HEADER_SIZE && src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        // Rejects lengths below the header size.
        let header = PacketHeader::decode(&mut &src[..PACKET_HEADER_SIZE])?;
        let mut frame = src.split_to(length);
        let payload = frame.split_off(PACKET_HEADER_SIZE).freeze();

        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            eom = header.is_end_of_message(),
            "decoded TDS packet"
        );
        Ok(Some(Packet::new(header, payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None if src.len() < PACKET_HEADER_SIZE => {
                Err(ProtocolError::ShortHeader(src.len()).into())
            }
            None => Err(ProtocolError::ConnectionClosed.into()),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = PACKET_HEADER_SIZE + item.payload.len();
        if total > self.max_packet_size {
            return Err(ProtocolError::InvalidPacketLength(u16::MAX).into());
        }

        let mut header = item.header;
        header.length = total as u16;
        dst.reserve(total);
        header.encode(dst);
        dst.put_slice(&item.payload);
        Ok(())
    }
}
