//! Column metadata and row value types.
//!
//! These are produced by the streaming COLMETADATA and ROW decoders in the
//! session layer; this module holds the shapes and the conversion from raw
//! value bytes to [`ColumnValue`].

use bytes::Bytes;

use crate::codec::utf16le_bytes_to_string;
use crate::collation::CodePageEncoding;
use crate::error::ProtocolError;
use crate::token::LengthPrefix;
use crate::types::{ColumnFlags, TypeId};

/// Length value that marks a `(max)` column encoded as PLP.
pub const PLP_MARKER: u32 = 0xFFFF;

/// Total length announcing a NULL PLP value.
pub const PLP_NULL: u64 = u64::MAX;

/// Size of the timestamp that follows a text pointer.
pub const TEXT_TIMESTAMP_LEN: usize = 8;

/// XML schema collection bound to an XML column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlSchemaCollection {
    /// Database name.
    pub database: String,
    /// Owning schema.
    pub owning_schema: String,
    /// Collection name.
    pub name: String,
}

/// Table name attached to TEXT, NTEXT and IMAGE columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultiPartTableName {
    /// Server part.
    pub server: Option<String>,
    /// Catalog part.
    pub catalog: Option<String>,
    /// Schema part.
    pub schema: Option<String>,
    /// Table part.
    pub table: Option<String>,
}

impl MultiPartTableName {
    /// Build from 1 to 4 parts in wire order (most qualified first).
    pub fn from_parts(parts: Vec<String>) -> Result<Self, ProtocolError> {
        if parts.is_empty() || parts.len() > 4 {
            return Err(ProtocolError::InvalidField {
                field: "table name parts",
                value: parts.len() as u32,
            });
        }
        let mut name = Self::default();
        let skip = 4 - parts.len();
        for (slot, part) in (skip..4).zip(parts) {
            match slot {
                0 => name.server = Some(part),
                1 => name.catalog = Some(part),
                2 => name.schema = Some(part),
                _ => name.table = Some(part),
            }
        }
        Ok(name)
    }
}

/// Type information for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Wire type.
    pub type_id: TypeId,
    /// Declared or derived maximum length in bytes.
    pub length: u32,
    /// How each row value's length is encoded.
    pub value_length: ValueLength,
    /// Precision for decimal types.
    pub precision: u8,
    /// Scale for decimal and time types.
    pub scale: u8,
    /// Character encoding for non-Unicode character types.
    pub encoding: Option<CodePageEncoding>,
    /// Schema collection for XML columns.
    pub xml_schema: Option<XmlSchemaCollection>,
}

impl TypeInfo {
    /// Type info with only the type and length set.
    #[must_use]
    pub fn new(type_id: TypeId, length: u32, value_length: ValueLength) -> Self {
        Self {
            type_id,
            length,
            value_length,
            precision: 0,
            scale: 0,
            encoding: None,
            xml_schema: None,
        }
    }

    /// Whether values arrive in PLP chunks.
    #[must_use]
    pub fn is_plp(&self) -> bool {
        self.value_length == ValueLength::Plp
    }
}

/// How a row value's length is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLength {
    /// Always this many bytes; never NULL.
    Fixed(usize),
    /// A length prefix of the given width, with its NULL marker.
    Prefixed(LengthPrefix),
    /// A text pointer, then a timestamp, then a 4-byte length.
    TextPointer,
    /// Chunked with a 64-bit total.
    Plp,
}

/// Per-column Always Encrypted metadata, kept opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoMetadata {
    /// Index into the CEK table.
    pub ordinal: u16,
    /// User type of the plaintext.
    pub user_type: u32,
    /// Type of the plaintext.
    pub base_type: TypeInfo,
    /// Encryption algorithm id.
    pub algorithm: u8,
    /// Custom algorithm name, present when the id is 0.
    pub algorithm_name: Option<String>,
    /// Encryption type (deterministic or randomized).
    pub encryption_type: u8,
    /// Normalization rule version.
    pub normalization_version: u8,
}

/// One encrypted value of a column encryption key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CekValue {
    /// Encrypted key material.
    pub encrypted_key: Bytes,
    /// Key store provider name.
    pub key_store_name: String,
    /// Master key path.
    pub key_path: String,
    /// Asymmetric algorithm used to encrypt the key.
    pub algorithm: String,
}

/// One entry of the CEK table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CekEntry {
    /// Database id.
    pub database_id: i32,
    /// Key id.
    pub cek_id: i32,
    /// Key version.
    pub cek_version: i32,
    /// Metadata version.
    pub md_version: [u8; 8],
    /// Encrypted values.
    pub values: Vec<CekValue>,
}

/// Column encryption key table sent ahead of the columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CekTable {
    /// Entries in ordinal order.
    pub entries: Vec<CekEntry>,
}

/// Metadata for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// User type.
    pub user_type: u32,
    /// Flags.
    pub flags: ColumnFlags,
    /// Type information.
    pub type_info: TypeInfo,
    /// Table name for long types.
    pub table_name: Option<MultiPartTableName>,
    /// Encryption metadata for encrypted columns.
    pub crypto: Option<CryptoMetadata>,
    /// Column name.
    pub name: String,
}

/// An ordered set of column metadata from one COLMETADATA token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnMetadataSet {
    /// Columns in ordinal order.
    pub columns: Vec<ColumnMetadata>,
    /// CEK table, when column encryption was negotiated.
    pub cek_table: Option<CekTable>,
}

impl ColumnMetadataSet {
    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the set has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column at a zero-based ordinal.
    #[must_use]
    pub fn get(&self, ordinal: usize) -> Option<&ColumnMetadata> {
        self.columns.get(ordinal)
    }

    /// Iterate over the columns.
    pub fn iter(&self) -> std::slice::Iter<'_, ColumnMetadata> {
        self.columns.iter()
    }
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    /// SQL NULL.
    Null,
    /// Integer family, widened.
    Int(i64),
    /// Character family.
    String(String),
    /// Everything else, as raw bytes.
    Bytes(Bytes),
}

impl ColumnValue {
    /// Convert raw value bytes for a column.
    pub fn from_raw(type_info: &TypeInfo, raw: Bytes) -> Result<Self, ProtocolError> {
        let type_id = type_info.type_id;
        if type_id.is_integer() {
            return decode_int(type_id, &raw).map(Self::Int);
        }
        if type_id.is_unicode() {
            return utf16le_bytes_to_string(&raw).map(Self::String);
        }
        if type_id.is_char() {
            let encoding = type_info
                .encoding
                .as_ref()
                .ok_or(ProtocolError::StringEncoding("character column without collation"))?;
            return encoding.decode(&raw).map(Self::String);
        }
        Ok(Self::Bytes(raw))
    }

    /// Whether this is NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

fn decode_int(type_id: TypeId, raw: &[u8]) -> Result<i64, ProtocolError> {
    let value = match raw.len() {
        1 if matches!(type_id, TypeId::Bit | TypeId::BitN) => i64::from(raw[0] != 0),
        // TINYINT is unsigned on the wire.
        1 => i64::from(raw[0]),
        2 => i64::from(i16::from_le_bytes([raw[0], raw[1]])),
        4 => i64::from(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            i64::from_le_bytes(bytes)
        }
        n => {
            return Err(ProtocolError::InvalidField {
                field: "integer width",
                value: n as u32,
            });
        }
    };
    Ok(value)
}
