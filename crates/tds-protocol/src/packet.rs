//! The fixed eight-byte header that prefixes every physical TDS packet.
//!
//! Layout on the wire:
//!
//! | offset | size | field         |
//! |--------|------|---------------|
//! | 0      | 1    | type          |
//! | 1      | 1    | status        |
//! | 2      | 2    | length (BE)   |
//! | 4      | 2    | spid (BE)     |
//! | 6      | 1    | packet number |
//! | 7      | 1    | window        |

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Bytes occupied by the header at the front of each packet.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Largest value the 16-bit length field can describe.
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Packet size used until the server announces another one.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Message type carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL text batch.
    SqlBatch = 0x01,
    /// Legacy login message from clients older than TDS 7.
    PreTds7Login = 0x02,
    /// Stored procedure invocation.
    Rpc = 0x03,
    /// Server response stream made of tokens.
    TabularResult = 0x04,
    /// Cancel request for the running batch.
    Attention = 0x06,
    /// Bulk insert rows.
    BulkLoad = 0x07,
    /// Federated authentication token.
    FedAuthToken = 0x08,
    /// Distributed transaction request.
    TransactionManager = 0x0E,
    /// LOGIN7 record.
    Tds7Login = 0x10,
    /// SSPI blob.
    Sspi = 0x11,
    /// PRELOGIN options, also used to frame the TLS handshake.
    PreLogin = 0x12,
}

impl PacketType {
    /// Map a header byte to a packet type.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Self::try_from(value)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let packet_type = match value {
            0x01 => Self::SqlBatch,
            0x02 => Self::PreTds7Login,
            0x03 => Self::Rpc,
            0x04 => Self::TabularResult,
            0x06 => Self::Attention,
            0x07 => Self::BulkLoad,
            0x08 => Self::FedAuthToken,
            0x0E => Self::TransactionManager,
            0x10 => Self::Tds7Login,
            0x11 => Self::Sspi,
            0x12 => Self::PreLogin,
            other => return Err(ProtocolError::InvalidPacketType(other)),
        };
        Ok(packet_type)
    }
}

bitflags! {
    /// Status byte of a packet header.
    ///
    /// A packet without `END_OF_MESSAGE` is followed by more packets of the
    /// same message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// Intermediate packet of a larger message.
        const NORMAL = 0x00;
        /// Final packet of the message.
        const END_OF_MESSAGE = 0x01;
        /// Receiver discards the message.
        const IGNORE_EVENT = 0x02;
        /// Continuation packet written by a soft flush.
        const BATCH = 0x04;
        /// Server resets session state before running the request.
        const RESET_CONNECTION = 0x08;
        /// As `RESET_CONNECTION`, keeping the open transaction.
        const RESET_CONNECTION_KEEP_TRANSACTION = 0x10;
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Message type.
    pub packet_type: PacketType,
    /// Status flags. Bits this crate does not name are kept.
    pub status: PacketStatus,
    /// Packet length, header included. Never below eight once decoded.
    pub length: u16,
    /// Server session id. Clients send zero.
    pub spid: u16,
    /// Sequence number within a message, wrapping at 255.
    pub packet_id: u8,
    /// Reserved, zero.
    pub window: u8,
}

impl PacketHeader {
    /// Header with zero spid, packet number and window.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Read a header from the front of `src`.
    ///
    /// Fails without consuming anything when fewer than eight bytes are
    /// buffered. A length field below eight is rejected since it leaves no
    /// room for the header itself.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let available = src.remaining();
        if available < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: available,
            });
        }

        let mut raw = [0u8; PACKET_HEADER_SIZE];
        src.copy_to_slice(&mut raw);

        let length = u16::from_be_bytes([raw[2], raw[3]]);
        if usize::from(length) < PACKET_HEADER_SIZE {
            return Err(ProtocolError::InvalidPacketLength(length));
        }

        Ok(Self {
            packet_type: PacketType::try_from(raw[0])?,
            status: PacketStatus::from_bits_retain(raw[1]),
            length,
            spid: u16::from_be_bytes([raw[4], raw[5]]),
            packet_id: raw[6],
            window: raw[7],
        })
    }

    /// Append the eight header bytes to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.to_bytes());
    }

    /// The header as a fixed array.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE] {
        let length = self.length.to_be_bytes();
        let spid = self.spid.to_be_bytes();
        [
            self.packet_type as u8,
            self.status.bits(),
            length[0],
            length[1],
            spid[0],
            spid[1],
            self.packet_id,
            self.window,
        ]
    }

    /// Overwrite the first eight bytes of `dst` with this header.
    ///
    /// Packet writers reserve the header slot up front and patch it once
    /// the payload length is known.
    pub fn write_into(&self, dst: &mut [u8]) {
        dst[..PACKET_HEADER_SIZE].copy_from_slice(&self.to_bytes());
    }

    /// The header as an owned buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Bytes of payload following the header.
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Whether the message ends with this packet.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Replace the packet number.
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }

    /// Replace the spid.
    #[must_use]
    pub const fn with_spid(mut self, spid: u16) -> Self {
        self.spid = spid;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_spid_is_big_endian() {
        let header = PacketHeader::new(PacketType::TabularResult, PacketStatus::END_OF_MESSAGE, 100)
            .with_spid(0x0036)
            .with_packet_id(1);
        assert_eq!(
            header.to_bytes(),
            [0x04, 0x01, 0x00, 0x64, 0x00, 0x36, 0x01, 0x00]
        );
        assert_eq!(header.encode_to_bytes().as_ref(), &header.to_bytes());
    }

    #[test]
    fn test_short_buffer_not_consumed() {
        let raw = [0x04u8, 0x01, 0x00];
        let mut cursor = &raw[..];
        assert_eq!(
            PacketHeader::decode(&mut cursor),
            Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: 3
            })
        );
        assert_eq!(cursor.len(), 3);
    }

    #[test]
    fn test_payload_length() {
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 100);
        assert_eq!(header.payload_length(), 92);
    }

    #[test]
    fn test_unknown_status_bits_survive() {
        let raw = [0x04, 0x41, 0x00, 0x10, 0x00, 0x00, 0x01, 0x00];
        let header = PacketHeader::decode(&mut &raw[..]).unwrap();
        assert_eq!(header.status.bits(), 0x41);
        assert!(header.is_end_of_message());
    }

    #[test]
    fn test_length_below_header_rejected() {
        let raw = [0x04, 0x01, 0x00, 0x07, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(
            PacketHeader::decode(&mut &raw[..]),
            Err(ProtocolError::InvalidPacketLength(7))
        );
    }

    #[test]
    fn test_write_into_prefix() {
        let mut buf = [0xAAu8; 12];
        PacketHeader::new(PacketType::PreLogin, PacketStatus::NORMAL, 12)
            .with_packet_id(3)
            .write_into(&mut buf);
        assert_eq!(&buf[..8], &[0x12, 0x00, 0x00, 0x0C, 0x00, 0x00, 0x03, 0x00]);
        assert_eq!(&buf[8..], &[0xAA; 4]);
    }

    proptest::proptest! {
        #[test]
        fn header_roundtrip_any_valid_length(
            length in 8u16..=u16::MAX,
            status in proptest::prelude::any::<u8>(),
            spid in proptest::prelude::any::<u16>(),
            packet_id in proptest::prelude::any::<u8>(),
            window in proptest::prelude::any::<u8>(),
        ) {
            let header = PacketHeader {
                packet_type: PacketType::TabularResult,
                status: PacketStatus::from_bits_retain(status),
                length,
                spid,
                packet_id,
                window,
            };
            let bytes = header.encode_to_bytes();
            let decoded = PacketHeader::decode(&mut bytes.as_ref()).unwrap();
            proptest::prop_assert_eq!(header, decoded);
            proptest::prop_assert_eq!(decoded.payload_length(), length as usize - 8);
        }
    }

    #[test]
    fn test_batch_status_byte() {
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::BATCH, 512);
        assert_eq!(header.to_bytes()[1], 0x04);
        assert!(!header.is_end_of_message());
    }

    #[test]
    fn test_packet_type_bytes() {
        assert_eq!(PacketType::try_from(0x10), Ok(PacketType::Tds7Login));
        assert_eq!(PacketType::from_u8(0x12), Ok(PacketType::PreLogin));
        assert_eq!(
            PacketType::from_u8(0x05),
            Err(ProtocolError::InvalidPacketType(0x05))
        );
    }
}
