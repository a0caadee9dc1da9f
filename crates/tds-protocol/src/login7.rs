//! TDS LOGIN7 packet construction.
//!
//! ## Packet Structure
//!
//! - Fixed-length head (94 bytes): total length, version, sizes, flags, and an
//!   offset/length pair for every variable field.
//! - Variable-length data section: UTF-16LE strings, the obfuscated password,
//!   and the feature extension block.
//!
//! The password arrives here already obfuscated. See `mssql_auth` for the
//! transform.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16_string;
use crate::error::ProtocolError;
use crate::feature::{FeatureExtension, FeatureId};
use crate::version::TdsVersion;

/// LOGIN7 header size (fixed portion).
pub const LOGIN7_HEADER_SIZE: usize = 94;

bitflags! {
    /// LOGIN7 OptionFlags1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags1: u8 {
        /// Big-endian byte order.
        const BYTE_ORDER_BE = 0x01;
        /// EBCDIC character set.
        const CHAR_EBCDIC = 0x02;
        /// Dump/load off.
        const DUMP_LOAD_OFF = 0x10;
        /// Warn on database change.
        const USE_DB_ON = 0x20;
        /// Initial database change failure is fatal.
        const INIT_DB_FATAL = 0x40;
        /// Warn on language change.
        const SET_LANG_ON = 0x80;
    }
}

bitflags! {
    /// LOGIN7 OptionFlags2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags2: u8 {
        /// Initial language change failure is fatal.
        const INIT_LANG_FATAL = 0x01;
        /// ODBC client.
        const ODBC_ON = 0x02;
        /// Integrated security.
        const INTEGRATED_SECURITY = 0x80;
    }
}

bitflags! {
    /// LOGIN7 TypeFlags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        /// OLEDB client.
        const OLEDB = 0x10;
        /// Read-only application intent.
        const READ_ONLY_INTENT = 0x20;
    }
}

bitflags! {
    /// LOGIN7 OptionFlags3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags3: u8 {
        /// Change password request.
        const CHANGE_PASSWORD = 0x01;
        /// User instance.
        const USER_INSTANCE = 0x02;
        /// Accept unknown collations.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
        /// Feature extension block present.
        const EXTENSION = 0x10;
    }
}

/// LOGIN7 packet builder.
///
/// Immutable once built; the wire length is computed by [`Login7::encode`].
#[derive(Debug, Clone)]
pub struct Login7 {
    /// TDS version to request.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process ID.
    pub client_pid: u32,
    /// Option flags 1.
    pub option_flags1: OptionFlags1,
    /// Option flags 2.
    pub option_flags2: OptionFlags2,
    /// Type flags.
    pub type_flags: TypeFlags,
    /// Option flags 3 (the extension bit is derived from `features`).
    pub option_flags3: OptionFlags3,
    /// Client timezone offset in minutes.
    pub client_timezone: i32,
    /// Client LCID.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// Login name.
    pub username: String,
    /// Password, already obfuscated.
    pub password: Bytes,
    /// Application name.
    pub app_name: String,
    /// Server name as the client addressed it.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client ID (MAC address, typically zeros).
    pub client_id: [u8; 6],
    /// Requested feature extensions, in send order.
    pub features: Vec<FeatureExtension>,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: 4096,
            client_prog_version: 0,
            client_pid: std::process::id(),
            option_flags1: OptionFlags1::USE_DB_ON
                | OptionFlags1::INIT_DB_FATAL
                | OptionFlags1::SET_LANG_ON,
            option_flags2: OptionFlags2::INIT_LANG_FATAL | OptionFlags2::ODBC_ON,
            type_flags: TypeFlags::empty(),
            option_flags3: OptionFlags3::empty(),
            client_timezone: 0,
            client_lcid: 0,
            hostname: String::new(),
            username: String::new(),
            password: Bytes::new(),
            app_name: String::new(),
            server_name: String::new(),
            library_name: String::from("Core .Net SqlClient Data Provider"),
            language: String::new(),
            database: String::new(),
            client_id: [0u8; 6],
            features: Vec::new(),
        }
    }
}

/// Offset/length pair in the fixed head. Lengths count characters for
/// strings and bytes for the raw blobs.
#[derive(Clone, Copy, Default)]
struct Slot {
    offset: u16,
    len: u16,
}

impl Slot {
    fn put(self, dst: &mut impl BufMut) {
        dst.put_u16_le(self.offset);
        dst.put_u16_le(self.len);
    }
}

/// Accumulates the variable data section and hands out slots.
struct VarData {
    buf: BytesMut,
}

impl VarData {
    /// Offsets in the head are 16-bit, so the variable data must stay
    /// addressable by them.
    fn position(&self) -> Result<u16, ProtocolError> {
        let position = LOGIN7_HEADER_SIZE + self.buf.len();
        u16::try_from(position).map_err(|_| ProtocolError::FieldTooLong {
            field: "LOGIN7 variable data",
            length: position,
        })
    }

    fn string(&mut self, field: &'static str, s: &str) -> Result<Slot, ProtocolError> {
        let offset = self.position()?;
        let units = s.encode_utf16().count();
        let len = u16::try_from(units).map_err(|_| ProtocolError::FieldTooLong {
            field,
            length: units,
        })?;
        write_utf16_string(&mut self.buf, s);
        Ok(Slot { offset, len })
    }

    fn utf16_blob(&mut self, field: &'static str, blob: &[u8]) -> Result<Slot, ProtocolError> {
        let offset = self.position()?;
        let len = u16::try_from(blob.len() / 2).map_err(|_| ProtocolError::FieldTooLong {
            field,
            length: blob.len() / 2,
        })?;
        self.buf.put_slice(blob);
        Ok(Slot { offset, len })
    }

    fn empty(&self) -> Result<Slot, ProtocolError> {
        Ok(Slot {
            offset: self.position()?,
            len: 0,
        })
    }
}

fn length_u32(length: usize) -> Result<u32, ProtocolError> {
    u32::try_from(length).map_err(|_| ProtocolError::FieldTooLong {
        field: "LOGIN7 record",
        length,
    })
}

impl Login7 {
    /// Create a new Login7 packet builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the login name and the obfuscated password.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: Bytes) -> Self {
        self.username = username.into();
        self.password = password;
        self
    }

    /// Set the database to connect to.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the initial language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the hostname (client machine name).
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the client process id.
    #[must_use]
    pub fn with_client_pid(mut self, pid: u32) -> Self {
        self.client_pid = pid;
        self
    }

    /// Add feature extensions.
    #[must_use]
    pub fn with_features(mut self, features: impl IntoIterator<Item = FeatureExtension>) -> Self {
        self.features.extend(features);
        self
    }

    /// Encode the LOGIN7 payload.
    ///
    /// Fails with [`ProtocolError::FieldTooLong`] when a string or the
    /// variable data section outgrows the 16-bit offsets of the head.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let has_extension = !self.features.is_empty();
        let mut var = VarData {
            buf: BytesMut::with_capacity(256),
        };

        let hostname = var.string("hostname", &self.hostname)?;
        let username = var.string("username", &self.username)?;
        let password = var.utf16_blob("password", &self.password)?;
        let app_name = var.string("application name", &self.app_name)?;
        let server_name = var.string("server name", &self.server_name)?;

        // With extensions, the "unused" slot holds a 4-byte pointer to the
        // feature block, patched once the block's position is known.
        let (extension, pointer_at) = if has_extension {
            let slot = Slot {
                offset: var.position()?,
                len: 4,
            };
            let at = var.buf.len();
            var.buf.put_u32_le(0);
            (slot, Some(at))
        } else {
            (var.empty()?, None)
        };

        let library_name = var.string("library name", &self.library_name)?;
        let language = var.string("language", &self.language)?;
        let database = var.string("database", &self.database)?;
        let sspi = var.empty()?;
        let attach_db = var.empty()?;
        let change_password = var.empty()?;

        if let Some(at) = pointer_at {
            // The feature block pointer is 32-bit and may point past 64 KiB.
            let block_start = length_u32(LOGIN7_HEADER_SIZE + var.buf.len())?;
            var.buf[at..at + 4].copy_from_slice(&block_start.to_le_bytes());
            for feature in &self.features {
                feature.encode(&mut var.buf);
            }
            var.buf.put_u8(FeatureId::Terminator as u8);
        }

        let mut flags3 = self.option_flags3;
        flags3.set(OptionFlags3::EXTENSION, has_extension);

        let total_length = LOGIN7_HEADER_SIZE + var.buf.len();
        let mut buf = BytesMut::with_capacity(total_length);
        buf.put_u32_le(length_u32(total_length)?);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(0); // connection id
        buf.put_u8(self.option_flags1.bits());
        buf.put_u8(self.option_flags2.bits());
        buf.put_u8(self.type_flags.bits());
        buf.put_u8(flags3.bits());
        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);

        for slot in [hostname, username, password, app_name, server_name, extension] {
            slot.put(&mut buf);
        }
        for slot in [library_name, language, database] {
            slot.put(&mut buf);
        }
        buf.put_slice(&self.client_id);
        for slot in [sspi, attach_db, change_password] {
            slot.put(&mut buf);
        }
        buf.put_u32_le(0); // long SSPI length

        debug_assert_eq!(buf.len(), LOGIN7_HEADER_SIZE);
        buf.put_slice(&var.buf);
        Ok(buf.freeze())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::feature::FeatureRequests;

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }

    #[test]
    fn test_oversized_variable_data_rejected() {
        let long = "x".repeat(u16::MAX as usize + 1);
        assert_eq!(
            Login7::new().with_app_name(long).encode(),
            Err(ProtocolError::FieldTooLong {
                field: "application name",
                length: u16::MAX as usize + 1,
            })
        );

        // Each field fits on its own but pushes the database offset past
        // 16 bits.
        let half = "y".repeat(20_000);
        let err = Login7::new()
            .with_hostname(half.clone())
            .with_app_name(half)
            .encode()
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FieldTooLong {
                field: "LOGIN7 variable data",
                ..
            }
        ));
    }

    #[test]
    fn test_head_layout_without_features() {
        let encoded = Login7::new()
            .with_hostname("HOST")
            .with_credentials("sa", Bytes::from_static(&[0x92, 0xA5, 0xB3, 0xA5]))
            .with_database("master")
            .encode()
            .unwrap();

        assert_eq!(u32_at(&encoded, 0) as usize, encoded.len());
        assert_eq!(u32_at(&encoded, 4), TdsVersion::V7_4.raw());
        assert_eq!(encoded[27] & OptionFlags3::EXTENSION.bits(), 0);

        // Hostname starts the variable data.
        assert_eq!(u16_at(&encoded, 36), 94);
        assert_eq!(u16_at(&encoded, 38), 4);
        // Username follows.
        assert_eq!(u16_at(&encoded, 40), 94 + 8);
        assert_eq!(u16_at(&encoded, 42), 2);
        // Password length counts characters of the blob.
        let pw_offset = u16_at(&encoded, 44) as usize;
        assert_eq!(u16_at(&encoded, 46), 2);
        assert_eq!(&encoded[pw_offset..pw_offset + 4], &[0x92, 0xA5, 0xB3, 0xA5]);
    }

    #[test]
    fn test_feature_block_pointer() {
        let encoded = Login7::new()
            .with_features(FeatureRequests::default().extensions())
            .encode()
            .unwrap();

        assert_ne!(encoded[27] & OptionFlags3::EXTENSION.bits(), 0);
        let pointer_offset = u16_at(&encoded, 56) as usize;
        assert_eq!(u16_at(&encoded, 58), 4);
        let block = u32_at(&encoded, pointer_offset) as usize;

        // COLUMNENCRYPTION comes first with a 1-byte version.
        assert_eq!(encoded[block], FeatureId::ColumnEncryption as u8);
        assert_eq!(u32_at(&encoded, block + 1), 1);
        assert_eq!(*encoded.last().unwrap(), FeatureId::Terminator as u8);
    }

    #[test]
    fn test_option_flag_defaults() {
        let login = Login7::new();
        assert_eq!(login.option_flags1.bits(), 0xE0);
        assert_eq!(login.option_flags2.bits(), 0x03);
    }
}
