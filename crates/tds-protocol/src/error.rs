//! Protocol-level error types.

use thiserror::Error;

/// Errors raised while encoding or decoding TDS wire structures.
///
/// Every variant except the pure encoding helpers leaves the byte stream at an
/// unknown position, so a session that observes one must be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The peer closed the connection while a read was outstanding.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Fewer than eight header bytes arrived before end of stream.
    #[error("short packet header: {0} of 8 bytes received")]
    ShortHeader(usize),

    /// The framing buffer cannot satisfy the request.
    #[error("framing buffer exhausted: {0}")]
    BufferExhausted(&'static str),

    /// The server cannot provide the encryption the client requires.
    #[error("server does not support the required encryption")]
    EncryptionNotSupported,

    /// A collation could not be mapped to a code page.
    #[error("unsupported collation: lcid {lcid:#x}, sort id {sort_id}")]
    UnsupportedCollation {
        /// Locale id portion of the collation info.
        lcid: u32,
        /// Sort id byte.
        sort_id: u8,
    },

    /// The length of a token or type could not be determined.
    #[error("cannot determine length for token type {0:#04x}")]
    UnknownTokenLength(u8),

    /// The token type is recognized but not handled by this engine.
    #[error("unsupported token type {0:#04x}")]
    UnsupportedToken(u8),

    /// A feature acknowledgement arrived twice in one session.
    #[error("feature {0:#04x} acknowledged more than once")]
    DuplicateFeature(u8),

    /// A feature acknowledgement named an unknown feature.
    #[error("unknown feature {0:#04x} acknowledged")]
    UnknownFeature(u8),

    /// A byte slice ended before the structure was complete.
    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Unexpected end of a token body.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// Unknown packet type byte in a header.
    #[error("invalid packet type: {0:#04x}")]
    InvalidPacketType(u8),

    /// Header length smaller than the header itself, or larger than the buffer.
    #[error("invalid packet length: {0}")]
    InvalidPacketLength(u16),

    /// A PRELOGIN option id outside the known set.
    #[error("invalid prelogin option: {0:#04x}")]
    InvalidPreloginOption(u8),

    /// A PRELOGIN option points outside the payload.
    #[error("prelogin option {option:#04x} out of bounds")]
    PreloginOutOfBounds {
        /// The offending option id.
        option: u8,
    },

    /// A token type byte with no known meaning.
    #[error("invalid token type: {0:#04x}")]
    InvalidTokenType(u8),

    /// A type byte in column metadata with no known meaning.
    #[error("invalid data type: {0:#04x}")]
    InvalidDataType(u8),

    /// A string field was not valid UTF-16 or could not be decoded.
    #[error("string encoding error: {0}")]
    StringEncoding(&'static str),

    /// A field held a value outside its allowed range.
    #[error("invalid {field}: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u32,
    },

    /// A value is too long for the width of its length or offset field.
    #[error("{field} too long: {length}")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Length that did not fit.
        length: usize,
    },

    /// A row token arrived before any column metadata.
    #[error("row received before column metadata")]
    MissingColumnMetadata,

    /// A flush was requested before a packet type was set.
    #[error("packet type not set before flush")]
    PacketTypeNotSet,
}
