//! TDS token stream definitions.
//!
//! Every token starts with a type byte. Its body length is implied by bits of
//! that byte, carried in a 1, 2 or 4 byte prefix, or left to the token's own
//! decoder; [`LengthRule::for_type_byte`] encodes that decision. The same
//! rule classifies data type bytes in column metadata.
//!
//! Decoders here take the body of a length-prefixed token as a `Buf`
//! positioned just after the prefix. Tokens without a prefix (COLMETADATA,
//! ROW, NBCROW, FEATUREEXTACK) are decoded incrementally by the session.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes};

use crate::codec::{ensure, read_b_varchar, read_us_varchar, read_utf16_string};
use crate::collation::Collation;
use crate::error::ProtocolError;
use crate::types::TypeId;
use crate::version::TdsVersion;

/// Token type identifiers.
///
/// The set is closed: every token byte a server may send has a variant, and
/// the session decides per variant whether it is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Offset (OFFSET).
    Offset = 0x78,
    /// Return status (RETURNSTATUS).
    ReturnStatus = 0x79,
    /// Column metadata (COLMETADATA).
    ColMetaData = 0x81,
    /// Compute column metadata (ALTMETADATA).
    AltMetaData = 0x88,
    /// Data classification (DATACLASSIFICATION).
    DataClassification = 0xA3,
    /// Table name (TABNAME).
    TabName = 0xA4,
    /// Column info (COLINFO).
    ColInfo = 0xA5,
    /// Order (ORDER).
    Order = 0xA9,
    /// Error message (ERROR).
    Error = 0xAA,
    /// Informational message (INFO).
    Info = 0xAB,
    /// Return value (RETURNVALUE).
    ReturnValue = 0xAC,
    /// Login acknowledgment (LOGINACK).
    LoginAck = 0xAD,
    /// Feature extension acknowledgment (FEATUREEXTACK).
    FeatureExtAck = 0xAE,
    /// Row data (ROW).
    Row = 0xD1,
    /// Null bitmap compressed row (NBCROW).
    NbcRow = 0xD2,
    /// Compute row (ALTROW).
    AltRow = 0xD3,
    /// Environment change (ENVCHANGE).
    EnvChange = 0xE3,
    /// Session state (SESSIONSTATE).
    SessionState = 0xE4,
    /// SSPI authentication (SSPI).
    Sspi = 0xED,
    /// Federated authentication info (FEDAUTHINFO).
    FedAuthInfo = 0xEE,
    /// Done (DONE).
    Done = 0xFD,
    /// Done procedure (DONEPROC).
    DoneProc = 0xFE,
    /// Done in procedure (DONEINPROC).
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Create a token type from a raw byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x78 => Self::Offset,
            0x79 => Self::ReturnStatus,
            0x81 => Self::ColMetaData,
            0x88 => Self::AltMetaData,
            0xA3 => Self::DataClassification,
            0xA4 => Self::TabName,
            0xA5 => Self::ColInfo,
            0xA9 => Self::Order,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAC => Self::ReturnValue,
            0xAD => Self::LoginAck,
            0xAE => Self::FeatureExtAck,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xD3 => Self::AltRow,
            0xE3 => Self::EnvChange,
            0xE4 => Self::SessionState,
            0xED => Self::Sspi,
            0xEE => Self::FedAuthInfo,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            _ => return Err(ProtocolError::InvalidTokenType(value)),
        })
    }
}

/// Width of an explicit length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthPrefix {
    /// One byte.
    U8,
    /// Two bytes, little-endian.
    U16,
    /// Four bytes, little-endian.
    I32,
}

impl LengthPrefix {
    /// Bytes occupied by the prefix itself.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::I32 => 4,
        }
    }

    /// Prefix value that marks NULL for a data value of this width.
    ///
    /// One-byte prefixed values use zero; the wider prefixes use all ones.
    #[must_use]
    pub const fn null_marker(self) -> u32 {
        match self {
            Self::U8 => 0,
            Self::U16 => 0xFFFF,
            Self::I32 => 0xFFFF_FFFF,
        }
    }

    /// Read the prefix from a buffer.
    pub fn read(self, src: &mut impl Buf) -> Result<u32, ProtocolError> {
        ensure(src, self.width())?;
        Ok(match self {
            Self::U8 => u32::from(src.get_u8()),
            Self::U16 => u32::from(src.get_u16_le()),
            Self::I32 => src.get_u32_le(),
        })
    }
}

/// How the body length of a token or value is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthRule {
    /// No prefix; the decoder consumes exactly what it needs.
    CallerDriven,
    /// No body.
    Zero,
    /// Body of a fixed size.
    Fixed(usize),
    /// Body preceded by an explicit length.
    Prefixed(LengthPrefix),
}

impl LengthRule {
    /// Classify a type byte.
    ///
    /// A handful of bytes are special-cased; everything else is decided by
    /// the `0x30` length-class bits.
    pub fn for_type_byte(type_byte: u8) -> Result<Self, ProtocolError> {
        const FEATURE_EXT_ACK: u8 = TokenType::FeatureExtAck as u8;
        const RETURN_VALUE: u8 = TokenType::ReturnValue as u8;
        const SESSION_STATE: u8 = TokenType::SessionState as u8;
        const FED_AUTH_INFO: u8 = TokenType::FedAuthInfo as u8;
        const UDT: u8 = TypeId::Udt as u8;
        const XML: u8 = TypeId::Xml as u8;

        match type_byte {
            FEATURE_EXT_ACK | UDT | RETURN_VALUE => return Ok(Self::CallerDriven),
            SESSION_STATE | FED_AUTH_INFO => return Ok(Self::Prefixed(LengthPrefix::I32)),
            XML => return Ok(Self::Prefixed(LengthPrefix::U16)),
            _ => {}
        }

        match type_byte & 0x30 {
            0x30 => Ok(Self::Fixed(1usize << ((type_byte & 0x0C) >> 2))),
            0x10 => Ok(Self::Zero),
            // 0x00 is the variable-count class (COLMETADATA); it shares the
            // variable-length split.
            0x20 | 0x00 => {
                if type_byte & 0x80 != 0 {
                    Ok(Self::Prefixed(LengthPrefix::U16))
                } else if type_byte & 0x0C == 0 {
                    Ok(Self::Prefixed(LengthPrefix::I32))
                } else {
                    Ok(Self::Prefixed(LengthPrefix::U8))
                }
            }
            _ => Err(ProtocolError::UnknownTokenLength(type_byte)),
        }
    }
}

/// Resolved length of one token body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLength {
    /// The decoder reads as much as the token structure dictates.
    CallerDriven,
    /// Exactly this many bytes.
    Known(usize),
}

bitflags! {
    /// DONE, DONEPROC and DONEINPROC status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// The row count is valid.
        const COUNT = 0x0010;
        /// Attention acknowledgement.
        const ATTN = 0x0020;
        /// A server error terminated the statement.
        const SRVERROR = 0x0100;
    }
}

/// Body of a DONE, DONEPROC or DONEINPROC token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Done {
    /// Status flags.
    pub status: DoneStatus,
    /// Current command.
    pub cur_cmd: u16,
    /// Row count, valid when [`DoneStatus::COUNT`] is set.
    pub row_count: i64,
}

impl Done {
    /// Wire size of the body on TDS 7.2 and later.
    ///
    /// The length rule classifies `0xFD` as fixed 8; the 64-bit row count
    /// makes the real body 12 bytes.
    pub const SIZE: usize = 12;

    /// Decode the body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < Self::SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: Self::SIZE,
                actual: src.remaining(),
            });
        }
        Ok(Self {
            status: DoneStatus::from_bits_retain(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_i64_le(),
        })
    }

    /// Encode with the given token byte.
    pub fn encode(&self, token: TokenType, dst: &mut impl BufMut) {
        dst.put_u8(token as u8);
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_i64_le(self.row_count);
    }

    /// Whether further results follow in the same response.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }
}

/// An ERROR or INFO message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// State.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number.
    pub line: u32,
}

impl ServerMessage {
    /// Decode an ERROR or INFO body.
    ///
    /// Older servers send a 2-byte line number, newer ones 4 bytes; the
    /// width follows whatever the body still holds.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 6)?;
        let number = src.get_i32_le();
        let state = src.get_u8();
        let class = src.get_u8();
        let message = read_us_varchar(src)?;
        let server = read_b_varchar(src)?;
        let procedure = read_b_varchar(src)?;
        let line = match src.remaining() {
            0 | 1 => return Err(ProtocolError::UnexpectedEof),
            2 | 3 => u32::from(src.get_u16_le()),
            _ => src.get_u32_le(),
        };
        src.advance(src.remaining());

        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Severity 20 and above closes the connection on the server side.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.class >= 20
    }
}

/// LOGINACK body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface type.
    pub interface: u8,
    /// Negotiated TDS version.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server program version: major, minor, build high, build low.
    pub prog_version: [u8; 4],
}

impl LoginAck {
    /// Decode a LOGINACK body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 5)?;
        let interface = src.get_u8();
        // The version is the one big-endian field in this token.
        let tds_version = TdsVersion::new(src.get_u32());
        let prog_name = read_b_varchar(src)?;
        ensure(src, 4)?;
        let mut prog_version = [0u8; 4];
        src.copy_to_slice(&mut prog_version);
        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        })
    }
}

/// ENVCHANGE sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvChangeType {
    /// Database changed.
    Database = 1,
    /// Language changed.
    Language = 2,
    /// Character set changed.
    CharacterSet = 3,
    /// Packet size changed.
    PacketSize = 4,
    /// Unicode data sorting locale id.
    UnicodeSortingLocalId = 5,
    /// Unicode comparison flags.
    UnicodeComparisonFlags = 6,
    /// SQL collation.
    SqlCollation = 7,
    /// Begin transaction.
    BeginTransaction = 8,
    /// Commit transaction.
    CommitTransaction = 9,
    /// Rollback transaction.
    RollbackTransaction = 10,
    /// Enlist DTC transaction.
    EnlistDtcTransaction = 11,
    /// Defect DTC transaction.
    DefectTransaction = 12,
    /// Real-time log shipping.
    RealTimeLogShipping = 13,
    /// Promote transaction.
    PromoteTransaction = 15,
    /// Transaction manager address.
    TransactionManagerAddress = 16,
    /// Transaction ended.
    TransactionEnded = 17,
    /// Reset connection completion acknowledgment.
    ResetConnectionAck = 18,
    /// User instance started.
    UserInstanceStarted = 19,
    /// Routing information.
    Routing = 20,
}

impl EnvChangeType {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            1 => Self::Database,
            2 => Self::Language,
            3 => Self::CharacterSet,
            4 => Self::PacketSize,
            5 => Self::UnicodeSortingLocalId,
            6 => Self::UnicodeComparisonFlags,
            7 => Self::SqlCollation,
            8 => Self::BeginTransaction,
            9 => Self::CommitTransaction,
            10 => Self::RollbackTransaction,
            11 => Self::EnlistDtcTransaction,
            12 => Self::DefectTransaction,
            13 => Self::RealTimeLogShipping,
            15 => Self::PromoteTransaction,
            16 => Self::TransactionManagerAddress,
            17 => Self::TransactionEnded,
            18 => Self::ResetConnectionAck,
            19 => Self::UserInstanceStarted,
            20 => Self::Routing,
            _ => {
                return Err(ProtocolError::InvalidField {
                    field: "envchange type",
                    value: u32::from(value),
                });
            }
        })
    }
}

/// One decoded environment change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Database, language, character set and the other string-valued kinds.
    Text {
        /// Sub-type.
        kind: EnvChangeType,
        /// New value.
        new: String,
        /// Old value.
        old: String,
    },
    /// Negotiated packet size.
    PacketSize {
        /// New size in bytes.
        new: u32,
        /// Old size in bytes, zero when absent.
        old: u32,
    },
    /// Session collation.
    SqlCollation {
        /// New collation, absent when the server sent an empty value.
        new: Option<Collation>,
        /// Old collation.
        old: Option<Collation>,
    },
    /// Transaction descriptors and the other binary-valued kinds.
    Binary {
        /// Sub-type.
        kind: EnvChangeType,
        /// New value.
        new: Bytes,
        /// Old value.
        old: Bytes,
    },
    /// Redirect to another server.
    Routing {
        /// Routing protocol, 0 for TCP.
        protocol: u8,
        /// Target port.
        port: u16,
        /// Target server name.
        server: String,
    },
}

impl EnvChange {
    /// Decode an ENVCHANGE body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 1)?;
        let kind = EnvChangeType::from_u8(src.get_u8())?;
        let change = match kind {
            EnvChangeType::Routing => Self::decode_routing(src)?,
            EnvChangeType::PacketSize => {
                let new = parse_size(&read_b_varchar(src)?)?;
                let old = parse_size(&read_b_varchar(src)?)?;
                Self::PacketSize { new, old }
            }
            EnvChangeType::SqlCollation => {
                let new = read_collation(src)?;
                let old = read_collation(src)?;
                Self::SqlCollation { new, old }
            }
            EnvChangeType::BeginTransaction
            | EnvChangeType::CommitTransaction
            | EnvChangeType::RollbackTransaction
            | EnvChangeType::EnlistDtcTransaction
            | EnvChangeType::DefectTransaction
            | EnvChangeType::TransactionManagerAddress
            | EnvChangeType::TransactionEnded
            | EnvChangeType::ResetConnectionAck => {
                let new = read_b_varbyte(src)?;
                let old = read_b_varbyte(src)?;
                Self::Binary { kind, new, old }
            }
            EnvChangeType::PromoteTransaction => {
                ensure(src, 4)?;
                let len = src.get_u32_le() as usize;
                ensure(src, len)?;
                let new = src.copy_to_bytes(len);
                let old = read_b_varbyte(src)?;
                Self::Binary { kind, new, old }
            }
            EnvChangeType::Database
            | EnvChangeType::Language
            | EnvChangeType::CharacterSet
            | EnvChangeType::UnicodeSortingLocalId
            | EnvChangeType::UnicodeComparisonFlags
            | EnvChangeType::RealTimeLogShipping
            | EnvChangeType::UserInstanceStarted => {
                let new = read_b_varchar(src)?;
                let old = read_b_varchar(src)?;
                Self::Text { kind, new, old }
            }
        };
        Ok(change)
    }

    fn decode_routing(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let value_len = src.get_u16_le() as usize;
        ensure(src, value_len.max(5))?;
        let protocol = src.get_u8();
        let port = src.get_u16_le();
        let server_chars = src.get_u16_le() as usize;
        let server = read_utf16_string(src, server_chars)?;
        // Old value is an empty u16-prefixed blob.
        if src.remaining() >= 2 {
            src.advance(2);
        }
        Ok(Self::Routing {
            protocol,
            port,
            server,
        })
    }

    /// Sub-type of this change.
    #[must_use]
    pub fn kind(&self) -> EnvChangeType {
        match self {
            Self::Text { kind, .. } | Self::Binary { kind, .. } => *kind,
            Self::PacketSize { .. } => EnvChangeType::PacketSize,
            Self::SqlCollation { .. } => EnvChangeType::SqlCollation,
            Self::Routing { .. } => EnvChangeType::Routing,
        }
    }

    /// New database name, if this is a database change.
    #[must_use]
    pub fn new_database(&self) -> Option<&str> {
        match self {
            Self::Text {
                kind: EnvChangeType::Database,
                new,
                ..
            } => Some(new),
            _ => None,
        }
    }
}

fn parse_size(value: &str) -> Result<u32, ProtocolError> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse()
        .map_err(|_| ProtocolError::StringEncoding("packet size is not a number"))
}

fn read_b_varbyte(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    ensure(src, 1)?;
    let len = src.get_u8() as usize;
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}

fn read_collation(src: &mut impl Buf) -> Result<Option<Collation>, ProtocolError> {
    let mut raw = read_b_varbyte(src)?;
    if raw.len() == Collation::SIZE {
        Ok(Some(Collation::decode(&mut raw)?))
    } else {
        Ok(None)
    }
}

/// Decode an ORDER body into 1-based column ordinals.
pub fn decode_order(src: &mut impl Buf) -> Result<Vec<u16>, ProtocolError> {
    if src.remaining() % 2 != 0 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let mut columns = Vec::with_capacity(src.remaining() / 2);
    while src.has_remaining() {
        columns.push(src.get_u16_le());
    }
    Ok(columns)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{write_b_varchar, write_us_varchar};
    use bytes::BytesMut;

    #[test]
    fn test_length_rule_table() {
        let cases: &[(u8, LengthRule)] = &[
            // Fixed class, exponent in bits 0x0C.
            (0x30, LengthRule::Fixed(1)),
            (0x34, LengthRule::Fixed(2)),
            (0x38, LengthRule::Fixed(4)),
            (0x7F, LengthRule::Fixed(8)),
            (0x79, LengthRule::Fixed(4)),
            (0xFD, LengthRule::Fixed(8)),
            // Zero class.
            (0xD1, LengthRule::Zero),
            (0x1F, LengthRule::Zero),
            // Variable with the high bit set.
            (0xAA, LengthRule::Prefixed(LengthPrefix::U16)),
            (0xE3, LengthRule::Prefixed(LengthPrefix::U16)),
            (0xE7, LengthRule::Prefixed(LengthPrefix::U16)),
            (0x81, LengthRule::Prefixed(LengthPrefix::U16)),
            // Variable with 0x0C clear.
            (0x22, LengthRule::Prefixed(LengthPrefix::I32)),
            (0x23, LengthRule::Prefixed(LengthPrefix::I32)),
            // Variable otherwise.
            (0x26, LengthRule::Prefixed(LengthPrefix::U8)),
            (0x6A, LengthRule::Prefixed(LengthPrefix::U8)),
            (0x24, LengthRule::Prefixed(LengthPrefix::U8)),
        ];
        for &(byte, expected) in cases {
            assert_eq!(
                LengthRule::for_type_byte(byte).unwrap(),
                expected,
                "type byte {byte:#04x}"
            );
        }
    }

    #[test]
    fn test_length_rule_special_cases() {
        for b in [0xAE, 0xF0, 0xAC] {
            assert_eq!(LengthRule::for_type_byte(b).unwrap(), LengthRule::CallerDriven);
        }
        for b in [0xE4, 0xEE] {
            assert_eq!(
                LengthRule::for_type_byte(b).unwrap(),
                LengthRule::Prefixed(LengthPrefix::I32)
            );
        }
        assert_eq!(
            LengthRule::for_type_byte(0xF1).unwrap(),
            LengthRule::Prefixed(LengthPrefix::U16)
        );
    }

    #[test]
    fn test_length_prefix_read() {
        let raw = [0x10, 0x00, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut buf = &raw[..];
        assert_eq!(LengthPrefix::U16.read(&mut buf).unwrap(), 0x10);
        assert_eq!(
            LengthPrefix::I32.read(&mut buf).unwrap(),
            LengthPrefix::I32.null_marker()
        );
        assert_eq!(LengthPrefix::U8.read(&mut buf), Err(ProtocolError::UnexpectedEof));
    }

    #[test]
    fn test_token_type_closed_set() {
        assert_eq!(TokenType::from_u8(0xFD).unwrap(), TokenType::Done);
        assert_eq!(TokenType::from_u8(0xED).unwrap(), TokenType::Sspi);
        assert_eq!(
            TokenType::from_u8(0x42),
            Err(ProtocolError::InvalidTokenType(0x42))
        );
    }

    fn message_body(line: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_i32_le(208);
        buf.put_u8(1);
        buf.put_u8(16);
        write_us_varchar(&mut buf, "Invalid object name 'x'.");
        write_b_varchar(&mut buf, "srv");
        write_b_varchar(&mut buf, "");
        buf.put_slice(line);
        buf
    }

    #[test]
    fn test_server_message_line_widths() {
        let mut wide = message_body(&7u32.to_le_bytes()).freeze();
        let msg = ServerMessage::decode(&mut wide).unwrap();
        assert_eq!(msg.number, 208);
        assert_eq!(msg.class, 16);
        assert_eq!(msg.message, "Invalid object name 'x'.");
        assert_eq!(msg.server, "srv");
        assert_eq!(msg.line, 7);
        assert!(!msg.is_fatal());

        let mut narrow = message_body(&9u16.to_le_bytes()).freeze();
        assert_eq!(ServerMessage::decode(&mut narrow).unwrap().line, 9);
        assert!(!narrow.has_remaining());
    }

    #[test]
    fn test_server_message_truncated() {
        let mut body = message_body(&[]).freeze();
        assert_eq!(
            ServerMessage::decode(&mut body),
            Err(ProtocolError::UnexpectedEof)
        );
    }

    #[test]
    fn test_login_ack_decode() {
        let mut buf = BytesMut::new();
        buf.put_u8(1);
        buf.put_u32(TdsVersion::V7_4.raw());
        write_b_varchar(&mut buf, "Microsoft SQL Server");
        buf.put_slice(&[16, 0, 0x10, 0x00]);

        let ack = LoginAck::decode(&mut buf.freeze()).unwrap();
        assert_eq!(ack.tds_version, TdsVersion::V7_4);
        assert_eq!(ack.prog_name, "Microsoft SQL Server");
        assert_eq!(ack.prog_version[0], 16);
    }

    #[test]
    fn test_env_change_packet_size() {
        let mut buf = BytesMut::new();
        buf.put_u8(EnvChangeType::PacketSize as u8);
        write_b_varchar(&mut buf, "8000");
        write_b_varchar(&mut buf, "4096");
        let change = EnvChange::decode(&mut buf.freeze()).unwrap();
        assert_eq!(change, EnvChange::PacketSize { new: 8000, old: 4096 });
    }

    #[test]
    fn test_env_change_collation() {
        let mut buf = BytesMut::new();
        buf.put_u8(EnvChangeType::SqlCollation as u8);
        buf.put_u8(5);
        buf.put_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]);
        buf.put_u8(0);
        let change = EnvChange::decode(&mut buf.freeze()).unwrap();
        let EnvChange::SqlCollation { new, old } = change else {
            panic!("expected a collation change, got {change:?}");
        };
        assert_eq!(new.unwrap().sort_id, 0x34);
        assert!(old.is_none());
    }

    #[test]
    fn test_env_change_routing() {
        let host: Vec<u16> = "replica".encode_utf16().collect();
        let mut buf = BytesMut::new();
        buf.put_u8(EnvChangeType::Routing as u8);
        buf.put_u16_le((5 + host.len() * 2) as u16);
        buf.put_u8(0);
        buf.put_u16_le(11000);
        buf.put_u16_le(host.len() as u16);
        for c in host {
            buf.put_u16_le(c);
        }
        buf.put_u16_le(0);

        let change = EnvChange::decode(&mut buf.freeze()).unwrap();
        assert_eq!(
            change,
            EnvChange::Routing {
                protocol: 0,
                port: 11000,
                server: "replica".into()
            }
        );
    }

    #[test]
    fn test_env_change_database() {
        let mut buf = BytesMut::new();
        buf.put_u8(EnvChangeType::Database as u8);
        write_b_varchar(&mut buf, "tempdb");
        write_b_varchar(&mut buf, "master");
        let change = EnvChange::decode(&mut buf.freeze()).unwrap();
        assert_eq!(change.new_database(), Some("tempdb"));
        assert_eq!(change.kind(), EnvChangeType::Database);
    }

    #[test]
    fn test_env_change_begin_transaction() {
        let mut buf = BytesMut::new();
        buf.put_u8(EnvChangeType::BeginTransaction as u8);
        buf.put_u8(8);
        buf.put_u64_le(0x0102_0304_0506_0708);
        buf.put_u8(0);
        let change = EnvChange::decode(&mut buf.freeze()).unwrap();
        let EnvChange::Binary { kind, new, old } = change else {
            panic!("expected a binary change");
        };
        assert_eq!(kind, EnvChangeType::BeginTransaction);
        assert_eq!(new.len(), 8);
        assert!(old.is_empty());
    }

    #[test]
    fn test_env_change_unknown_kind() {
        let raw = [14u8, 0, 0];
        assert!(EnvChange::decode(&mut &raw[..]).is_err());
    }

    #[test]
    fn test_done_roundtrip_and_size() {
        let done = Done {
            status: DoneStatus::COUNT | DoneStatus::MORE,
            cur_cmd: 0xC1,
            row_count: 3,
        };
        let mut buf = BytesMut::new();
        done.encode(TokenType::Done, &mut buf);
        assert_eq!(buf.len(), 1 + Done::SIZE);
        let mut body = buf.freeze().slice(1..);
        let decoded = Done::decode(&mut body).unwrap();
        assert_eq!(decoded, done);
        assert!(decoded.has_more());
    }

    #[test]
    fn test_done_row_count_is_signed() {
        let mut raw = vec![0x10, 0x00, 0xC1, 0x00];
        raw.extend_from_slice(&[0xFF; 8]);
        let done = Done::decode(&mut &raw[..]).unwrap();
        assert_eq!(done.row_count, -1);
        assert_eq!(done.status, DoneStatus::COUNT);
    }

    #[test]
    fn test_order_decode() {
        let raw = [0x01, 0x00, 0x03, 0x00];
        assert_eq!(decode_order(&mut &raw[..]).unwrap(), vec![1, 3]);
        assert!(decode_order(&mut &raw[..3]).is_err());
    }
}
