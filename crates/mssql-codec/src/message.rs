//! Packet-to-message reassembly.
//!
//! Packets of one message are concatenated until the one carrying
//! `END_OF_MESSAGE`. Used on the receiving side of a whole-packet stream.

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::PacketType;

use crate::packet_codec::Packet;

/// A complete message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Type of the first packet of the message.
    pub packet_type: PacketType,
    /// Concatenated payloads.
    pub payload: Bytes,
}

impl Message {
    /// Payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Accumulates packets until a message is complete.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
    packet_count: usize,
}

impl MessageAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a packet; returns the message once its last packet arrives.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        let packet_type = *self
            .packet_type
            .get_or_insert(packet.header.packet_type);
        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        if !packet.is_end_of_message() {
            return None;
        }

        tracing::trace!(
            ?packet_type,
            packets = self.packet_count,
            length = self.buffer.len(),
            "message complete"
        );
        self.packet_type = None;
        self.packet_count = 0;
        Some(Message {
            packet_type,
            payload: self.buffer.split().freeze(),
        })
    }

    /// Whether a message is partially assembled.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Packets accumulated for the current message.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Drop any partial message.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
        self.packet_count = 0;
    }
}
