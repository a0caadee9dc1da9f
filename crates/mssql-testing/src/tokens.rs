//! Server-side token encoders.
//!
//! [`ResponseBuilder`] writes the token stream a SQL Server would send, so
//! tests can script responses without hand-assembling bytes.
//!
//! ```rust,ignore
//! use mssql_testing::tokens::{MockColumn, ResponseBuilder, ScalarValue};
//!
//! let payload = ResponseBuilder::new()
//!     .colmetadata(&[MockColumn::int("id"), MockColumn::nvarchar("name", 50)])
//!     .row(&[ScalarValue::Int(1), ScalarValue::String("Alice".into())])
//!     .done(1)
//!     .build();
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tds_protocol::codec::{utf16_byte_len, write_b_varchar, write_us_varchar};
use tds_protocol::{
    Collation, Done, DoneStatus, EncryptionLevel, EnvChangeType, PreLoginOption, TdsVersion,
    TokenType, TypeId,
};

/// Latin1_General_CI_AS, code page 1252.
pub const LATIN1_COLLATION: Collation = Collation {
    info: 0x00D0_0409,
    sort_id: 0x34,
};

/// `cur_cmd` of a SELECT.
const CMD_SELECT: u16 = 0xC1;

/// Encode a PRELOGIN response payload.
///
/// Carries VERSION, ENCRYPTION and MARS; offsets are big-endian and measured
/// from the start of the payload.
#[must_use]
pub fn prelogin_response(encryption: EncryptionLevel, mars: bool) -> Bytes {
    // Three 5-byte directory entries plus the terminator.
    const DIRECTORY: u16 = 3 * 5 + 1;

    let mut buf = BytesMut::with_capacity(usize::from(DIRECTORY) + 8);
    buf.put_u8(PreLoginOption::Version as u8);
    buf.put_u16(DIRECTORY);
    buf.put_u16(6);
    buf.put_u8(PreLoginOption::Encryption as u8);
    buf.put_u16(DIRECTORY + 6);
    buf.put_u16(1);
    buf.put_u8(PreLoginOption::Mars as u8);
    buf.put_u16(DIRECTORY + 7);
    buf.put_u16(1);
    buf.put_u8(PreLoginOption::Terminator as u8);

    // 16.0.4135.0
    buf.put_u8(16);
    buf.put_u8(0);
    buf.put_u16(4135);
    buf.put_u16_le(0);
    buf.put_u8(encryption as u8);
    buf.put_u8(u8::from(mars));
    buf.freeze()
}

/// Value for one cell of a mock row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarValue {
    /// NULL.
    Null,
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// Unicode string.
    String(String),
    /// Single-byte string, encoded as Latin-1.
    Ansi(String),
    /// Binary data.
    Binary(Vec<u8>),
}

/// Mock column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Wire type.
    pub type_id: TypeId,
    /// Declared length in bytes.
    pub max_length: u16,
    /// Whether the column is nullable.
    pub nullable: bool,
}

impl MockColumn {
    /// Create a column of the given type and length.
    pub fn new(name: impl Into<String>, type_id: TypeId, max_length: u16) -> Self {
        Self {
            name: name.into(),
            type_id,
            max_length,
            nullable: true,
        }
    }

    /// INTN(4).
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN, 4)
    }

    /// INTN(8).
    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN, 8)
    }

    /// NVARCHAR(`chars`).
    pub fn nvarchar(name: impl Into<String>, chars: u16) -> Self {
        Self::new(name, TypeId::NVarChar, chars.saturating_mul(2))
    }

    /// VARCHAR(`len`) with the Latin-1 collation.
    pub fn varchar(name: impl Into<String>, len: u16) -> Self {
        Self::new(name, TypeId::BigVarChar, len)
    }

    /// VARBINARY(`len`).
    pub fn varbinary(name: impl Into<String>, len: u16) -> Self {
        Self::new(name, TypeId::BigVarBinary, len)
    }

    /// Set nullability.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    fn has_u8_length(&self) -> bool {
        matches!(
            self.type_id,
            TypeId::IntN | TypeId::BitN | TypeId::FloatN | TypeId::MoneyN | TypeId::DateTimeN
        )
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32_le(0);
        dst.put_u16_le(u16::from(self.nullable));
        dst.put_u8(self.type_id as u8);

        if self.has_u8_length() {
            dst.put_u8(self.max_length as u8);
        } else {
            dst.put_u16_le(self.max_length);
            if matches!(
                self.type_id,
                TypeId::NVarChar | TypeId::NChar | TypeId::BigVarChar | TypeId::BigChar
            ) {
                dst.put_u32_le(LATIN1_COLLATION.info);
                dst.put_u8(LATIN1_COLLATION.sort_id);
            }
        }
        write_b_varchar(dst, &self.name);
    }

    fn encode_value(&self, value: &ScalarValue, dst: &mut BytesMut) {
        let u8_len = self.has_u8_length();
        let put_len = |dst: &mut BytesMut, len: usize| {
            if u8_len {
                dst.put_u8(len as u8);
            } else {
                dst.put_u16_le(len as u16);
            }
        };

        match value {
            ScalarValue::Null if u8_len => dst.put_u8(0),
            ScalarValue::Null => dst.put_u16_le(0xFFFF),
            ScalarValue::Int(v) => {
                put_len(dst, 4);
                dst.put_i32_le(*v);
            }
            ScalarValue::BigInt(v) => {
                put_len(dst, 8);
                dst.put_i64_le(*v);
            }
            ScalarValue::String(s) => {
                put_len(dst, utf16_byte_len(s));
                for unit in s.encode_utf16() {
                    dst.put_u16_le(unit);
                }
            }
            ScalarValue::Ansi(s) => {
                let bytes: Vec<u8> = s
                    .chars()
                    .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                    .collect();
                put_len(dst, bytes.len());
                dst.put_slice(&bytes);
            }
            ScalarValue::Binary(data) => {
                put_len(dst, data.len());
                dst.put_slice(data);
            }
        }
    }
}

/// Builder for a server token stream.
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    buf: BytesMut,
    columns: Vec<MockColumn>,
}

impl ResponseBuilder {
    /// Start an empty stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes.
    #[must_use]
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }

    /// LOGINACK for the given version and server name.
    #[must_use]
    pub fn login_ack(mut self, version: TdsVersion, server_name: &str) -> Self {
        let len = 1 + 4 + 1 + utf16_byte_len(server_name) + 4;
        self.buf.put_u8(TokenType::LoginAck as u8);
        self.buf.put_u16_le(len as u16);
        self.buf.put_u8(1);
        self.buf.put_u32(version.raw());
        write_b_varchar(&mut self.buf, server_name);
        self.buf.put_slice(&[16, 0, 0x10, 0x27]);
        self
    }

    /// String-valued ENVCHANGE such as a database or language change.
    #[must_use]
    pub fn env_change(mut self, kind: EnvChangeType, new: &str, old: &str) -> Self {
        let len = 1 + 1 + utf16_byte_len(new) + 1 + utf16_byte_len(old);
        self.buf.put_u8(TokenType::EnvChange as u8);
        self.buf.put_u16_le(len as u16);
        self.buf.put_u8(kind as u8);
        write_b_varchar(&mut self.buf, new);
        write_b_varchar(&mut self.buf, old);
        self
    }

    /// Packet size ENVCHANGE.
    #[must_use]
    pub fn packet_size(self, new: u32, old: u32) -> Self {
        self.env_change(EnvChangeType::PacketSize, &new.to_string(), &old.to_string())
    }

    /// SQL collation ENVCHANGE.
    #[must_use]
    pub fn collation(mut self, new: Collation) -> Self {
        self.buf.put_u8(TokenType::EnvChange as u8);
        self.buf.put_u16_le(1 + 1 + 5 + 1);
        self.buf.put_u8(EnvChangeType::SqlCollation as u8);
        self.buf.put_u8(5);
        self.buf.put_u32_le(new.info);
        self.buf.put_u8(new.sort_id);
        self.buf.put_u8(0);
        self
    }

    /// Binary ENVCHANGE carrying a transaction descriptor.
    #[must_use]
    pub fn transaction(mut self, kind: EnvChangeType, descriptor: u64) -> Self {
        let (new, old) = match kind {
            EnvChangeType::BeginTransaction => (Some(descriptor), None),
            _ => (None, Some(descriptor)),
        };
        let width = |v: Option<u64>| if v.is_some() { 8 } else { 0 };
        self.buf.put_u8(TokenType::EnvChange as u8);
        self.buf.put_u16_le(1 + 1 + width(new) + 1 + width(old));
        self.buf.put_u8(kind as u8);
        for value in [new, old] {
            match value {
                Some(v) => {
                    self.buf.put_u8(8);
                    self.buf.put_u64_le(v);
                }
                None => self.buf.put_u8(0),
            }
        }
        self
    }

    /// FEATUREEXTACK with the given (id, data) entries.
    #[must_use]
    pub fn feature_ext_ack(mut self, features: &[(u8, &[u8])]) -> Self {
        self.buf.put_u8(TokenType::FeatureExtAck as u8);
        for (id, data) in features {
            self.buf.put_u8(*id);
            self.buf.put_u32_le(data.len() as u32);
            self.buf.put_slice(data);
        }
        self.buf.put_u8(0xFF);
        self
    }

    /// ERROR token.
    #[must_use]
    pub fn error(self, number: i32, class: u8, message: &str) -> Self {
        self.message(TokenType::Error, number, class, message)
    }

    /// INFO token.
    #[must_use]
    pub fn info(self, number: i32, message: &str) -> Self {
        self.message(TokenType::Info, number, 0, message)
    }

    fn message(mut self, token: TokenType, number: i32, class: u8, message: &str) -> Self {
        const SERVER: &str = "mock";
        let len = 4 + 1 + 1 + 2 + utf16_byte_len(message) + 1 + utf16_byte_len(SERVER) + 1 + 4;
        self.buf.put_u8(token as u8);
        self.buf.put_u16_le(len as u16);
        self.buf.put_i32_le(number);
        self.buf.put_u8(1);
        self.buf.put_u8(class);
        write_us_varchar(&mut self.buf, message);
        write_b_varchar(&mut self.buf, SERVER);
        write_b_varchar(&mut self.buf, "");
        self.buf.put_u32_le(1);
        self
    }

    /// COLMETADATA; later rows are encoded against these columns.
    #[must_use]
    pub fn colmetadata(mut self, columns: &[MockColumn]) -> Self {
        self.buf.put_u8(TokenType::ColMetaData as u8);
        self.buf.put_u16_le(columns.len() as u16);
        for column in columns {
            column.encode(&mut self.buf);
        }
        self.columns = columns.to_vec();
        self
    }

    /// ROW with one value per column.
    #[must_use]
    pub fn row(mut self, values: &[ScalarValue]) -> Self {
        self.buf.put_u8(TokenType::Row as u8);
        for (column, value) in self.columns.iter().zip(values) {
            column.encode_value(value, &mut self.buf);
        }
        self
    }

    /// NBCROW: NULL cells go into the bitmap and carry no data.
    #[must_use]
    pub fn nbc_row(mut self, values: &[ScalarValue]) -> Self {
        self.buf.put_u8(TokenType::NbcRow as u8);
        let mut bitmap = vec![0u8; self.columns.len().div_ceil(8)];
        for (i, value) in values.iter().enumerate() {
            if *value == ScalarValue::Null {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        self.buf.put_slice(&bitmap);
        for (column, value) in self.columns.iter().zip(values) {
            if *value != ScalarValue::Null {
                column.encode_value(value, &mut self.buf);
            }
        }
        self
    }

    /// RETURNSTATUS.
    #[must_use]
    pub fn return_status(mut self, status: i32) -> Self {
        self.buf.put_u8(TokenType::ReturnStatus as u8);
        self.buf.put_i32_le(status);
        self
    }

    /// Final DONE with a row count.
    #[must_use]
    pub fn done(self, row_count: i64) -> Self {
        let status = if row_count > 0 {
            DoneStatus::COUNT
        } else {
            DoneStatus::empty()
        };
        self.done_with(TokenType::Done, status, row_count)
    }

    /// DONE with the MORE flag set.
    #[must_use]
    pub fn done_more(self, row_count: i64) -> Self {
        self.done_with(TokenType::Done, DoneStatus::MORE | DoneStatus::COUNT, row_count)
    }

    /// Any DONE-family token.
    #[must_use]
    pub fn done_with(mut self, token: TokenType, status: DoneStatus, row_count: i64) -> Self {
        Done {
            status,
            cur_cmd: CMD_SELECT,
            row_count,
        }
        .encode(token, &mut self.buf);
        self
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish the stream.
    #[must_use]
    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::{LoginAck, PreLoginResponse};

    #[test]
    fn test_prelogin_response_decodes() {
        let payload = prelogin_response(EncryptionLevel::On, true);
        let decoded = PreLoginResponse::decode(&payload).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::On);
        assert!(decoded.mars);
        assert_eq!(decoded.version.unwrap().major, 16);
    }

    #[test]
    fn test_login_ack_decodes() {
        let bytes = ResponseBuilder::new()
            .login_ack(TdsVersion::V7_4, "mock")
            .build();
        assert_eq!(bytes[0], TokenType::LoginAck as u8);
        let len = usize::from(u16::from_le_bytes([bytes[1], bytes[2]]));
        assert_eq!(len, bytes.len() - 3);

        let ack = LoginAck::decode(&mut &bytes[3..]).unwrap();
        assert_eq!(ack.tds_version, TdsVersion::V7_4);
        assert_eq!(ack.prog_name, "mock");
    }

    #[test]
    fn test_nbc_row_bitmap() {
        let bytes = ResponseBuilder::new()
            .colmetadata(&[MockColumn::int("a"), MockColumn::int("b")])
            .nbc_row(&[ScalarValue::Null, ScalarValue::Int(7)])
            .build();
        let row = bytes
            .iter()
            .position(|b| *b == TokenType::NbcRow as u8)
            .unwrap();
        assert_eq!(&bytes[row + 1..], &[0b01, 4, 7, 0, 0, 0]);
    }

    #[test]
    fn test_done_status() {
        let bytes = ResponseBuilder::new().done_more(3).build();
        assert_eq!(bytes.len(), 1 + Done::SIZE);
        let status = u16::from_le_bytes([bytes[1], bytes[2]]);
        assert_eq!(status, (DoneStatus::MORE | DoneStatus::COUNT).bits());
    }
}
