//! TDS data type identifiers and column flags.

use crate::error::ProtocolError;

/// TDS data type identifiers as they appear in column metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    // Fixed-length types
    /// Null type.
    Null = 0x1F,
    /// 8-bit unsigned integer.
    Int1 = 0x30,
    /// Bit.
    Bit = 0x32,
    /// 16-bit signed integer.
    Int2 = 0x34,
    /// 32-bit signed integer.
    Int4 = 0x38,
    /// 64-bit signed integer.
    Int8 = 0x7F,
    /// 4-byte small datetime.
    DateTime4 = 0x3A,
    /// 32-bit floating point.
    Float4 = 0x3B,
    /// 8-byte money.
    Money = 0x3C,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 64-bit floating point.
    Float8 = 0x3E,
    /// 4-byte money.
    Money4 = 0x7A,

    // Byte-length prefixed types
    /// GUID.
    Guid = 0x24,
    /// Nullable integer.
    IntN = 0x26,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Nullable bit.
    BitN = 0x68,
    /// Decimal.
    DecimalN = 0x6A,
    /// Numeric.
    NumericN = 0x6C,
    /// Nullable float.
    FloatN = 0x6D,
    /// Nullable money.
    MoneyN = 0x6E,
    /// Nullable datetime.
    DateTimeN = 0x6F,
    /// Legacy fixed-length character.
    Char = 0x2F,
    /// Legacy variable-length character.
    VarChar = 0x27,
    /// Legacy fixed-length binary.
    Binary = 0x2D,
    /// Legacy variable-length binary.
    VarBinary = 0x25,

    // Date/time types with scale
    /// Date, 3 bytes.
    Date = 0x28,
    /// Time with scale.
    Time = 0x29,
    /// DateTime2 with scale.
    DateTime2 = 0x2A,
    /// DateTimeOffset with scale.
    DateTimeOffset = 0x2B,

    // Ushort-length prefixed types
    /// Variable-length character.
    BigVarChar = 0xA7,
    /// Variable-length binary.
    BigVarBinary = 0xA5,
    /// Fixed-length character.
    BigChar = 0xAF,
    /// Fixed-length binary.
    BigBinary = 0xAD,
    /// Fixed-length Unicode character.
    NChar = 0xEF,
    /// Variable-length Unicode character.
    NVarChar = 0xE7,

    // Long types
    /// Text.
    Text = 0x23,
    /// Image.
    Image = 0x22,
    /// NText.
    NText = 0x63,
    /// SQL variant.
    Variant = 0x62,
    /// User-defined type.
    Udt = 0xF0,
    /// XML.
    Xml = 0xF1,
}

impl TypeId {
    /// Create a type id from a raw byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3A => Self::DateTime4,
            0x3B => Self::Float4,
            0x3C => Self::Money,
            0x3D => Self::DateTime,
            0x3E => Self::Float8,
            0x7A => Self::Money4,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0xA7 => Self::BigVarChar,
            0xA5 => Self::BigVarBinary,
            0xAF => Self::BigChar,
            0xAD => Self::BigBinary,
            0xEF => Self::NChar,
            0xE7 => Self::NVarChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0x62 => Self::Variant,
            0xF0 => Self::Udt,
            0xF1 => Self::Xml,
            _ => return Err(ProtocolError::InvalidDataType(value)),
        })
    }

    /// Legacy long types that carry a text pointer and table name.
    #[must_use]
    pub const fn is_long(&self) -> bool {
        matches!(self, Self::Text | Self::Image | Self::NText)
    }

    /// Types that carry a collation in their metadata.
    #[must_use]
    pub const fn is_char(&self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::VarChar
                | Self::BigChar
                | Self::BigVarChar
                | Self::Text
                | Self::NChar
                | Self::NVarChar
                | Self::NText
                | Self::Xml
        )
    }

    /// UTF-16 character types.
    #[must_use]
    pub const fn is_unicode(&self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText | Self::Xml)
    }

    /// TIME, DATETIME2 and DATETIMEOFFSET.
    #[must_use]
    pub const fn is_var_time(&self) -> bool {
        matches!(self, Self::Time | Self::DateTime2 | Self::DateTimeOffset)
    }

    /// Types whose metadata carries precision and scale.
    #[must_use]
    pub const fn is_decimal(&self) -> bool {
        matches!(
            self,
            Self::Decimal | Self::Numeric | Self::DecimalN | Self::NumericN
        )
    }

    /// Integer family, including bit.
    #[must_use]
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Int1 | Self::Int2 | Self::Int4 | Self::Int8 | Self::IntN | Self::Bit | Self::BitN
        )
    }

    /// Types that may use the PLP encoding when declared `(max)`.
    #[must_use]
    pub const fn allows_plp(&self) -> bool {
        matches!(
            self,
            Self::BigVarChar | Self::BigVarBinary | Self::NVarChar | Self::Xml | Self::Udt
        )
    }
}

/// Stored length of the time portion for a fractional-second scale.
pub fn time_length_for_scale(scale: u8) -> Result<u32, ProtocolError> {
    match scale {
        0..=2 => Ok(3),
        3 | 4 => Ok(4),
        5..=7 => Ok(5),
        _ => Err(ProtocolError::InvalidField {
            field: "time scale",
            value: u32::from(scale),
        }),
    }
}

/// Column flags from COLMETADATA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    /// Column is nullable.
    pub nullable: bool,
    /// Column uses case-sensitive comparison.
    pub case_sensitive: bool,
    /// Column updatability.
    pub updateable: Updateable,
    /// Column is an identity column.
    pub identity: bool,
    /// Column is computed.
    pub computed: bool,
    /// Column is a sparse column set.
    pub column_set: bool,
    /// Column is encrypted.
    pub encrypted: bool,
    /// Column is hidden.
    pub hidden: bool,
    /// Column is a key column.
    pub key: bool,
    /// Nullability is unknown.
    pub nullable_unknown: bool,
}

/// Update mode for a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Updateable {
    /// Read-only.
    #[default]
    ReadOnly,
    /// Read-write.
    ReadWrite,
    /// Unknown.
    Unknown,
}

impl ColumnFlags {
    /// Parse the two flag bytes, first byte first.
    #[must_use]
    pub fn from_bytes(first: u8, second: u8) -> Self {
        Self {
            nullable: first & 0x01 != 0,
            case_sensitive: first & 0x02 != 0,
            updateable: match (first & 0x0C) >> 2 {
                0 => Updateable::ReadOnly,
                1 => Updateable::ReadWrite,
                _ => Updateable::Unknown,
            },
            identity: first & 0x10 != 0,
            computed: first & 0x20 != 0,
            column_set: second & 0x04 != 0,
            encrypted: second & 0x08 != 0,
            hidden: second & 0x20 != 0,
            key: second & 0x40 != 0,
            nullable_unknown: second & 0x80 != 0,
        }
    }

    /// Convert back to the two wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 2] {
        let mut first = 0u8;
        let mut second = 0u8;
        if self.nullable {
            first |= 0x01;
        }
        if self.case_sensitive {
            first |= 0x02;
        }
        first |= match self.updateable {
            Updateable::ReadOnly => 0,
            Updateable::ReadWrite => 1 << 2,
            Updateable::Unknown => 2 << 2,
        };
        if self.identity {
            first |= 0x10;
        }
        if self.computed {
            first |= 0x20;
        }
        if self.column_set {
            second |= 0x04;
        }
        if self.encrypted {
            second |= 0x08;
        }
        if self.hidden {
            second |= 0x20;
        }
        if self.key {
            second |= 0x40;
        }
        if self.nullable_unknown {
            second |= 0x80;
        }
        [first, second]
    }
}
