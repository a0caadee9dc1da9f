//! TDS pre-login packet handling.
//!
//! PRELOGIN is the first message on a fresh connection. It carries an option
//! directory (5 bytes per entry: id, big-endian offset, big-endian length)
//! terminated by `0xFF`, followed by the concatenated option data. Offsets are
//! measured from the start of the packet payload, so the first data byte of a
//! seven-option request sits at offset 36.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Largest option id a server may send, plus one.
pub const MAX_PRELOGIN_OPTIONS: usize = 8;

/// Size of one directory entry.
const OPTION_ENTRY_SIZE: usize = 5;

/// Pre-login option types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Instance name (for named instances).
    Instance = 0x02,
    /// Thread ID.
    ThreadId = 0x03,
    /// MARS (Multiple Active Result Sets) support.
    Mars = 0x04,
    /// Trace ID for distributed tracing.
    TraceId = 0x05,
    /// Federated authentication required.
    FedAuthRequired = 0x06,
    /// Nonce for encryption.
    Nonce = 0x07,
    /// Terminator (end of options).
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Version),
            0x01 => Ok(Self::Encryption),
            0x02 => Ok(Self::Instance),
            0x03 => Ok(Self::ThreadId),
            0x04 => Ok(Self::Mars),
            0x05 => Ok(Self::TraceId),
            0x06 => Ok(Self::FedAuthRequired),
            0x07 => Ok(Self::Nonce),
            0xFF => Ok(Self::Terminator),
            _ => Err(ProtocolError::InvalidPreloginOption(value)),
        }
    }
}

/// Value of the ENCRYPT option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt the login packet only.
    #[default]
    Off = 0x00,
    /// Encrypt everything.
    On = 0x01,
    /// No TLS at all.
    NotSupported = 0x02,
    /// Encrypt everything; refuse to continue otherwise.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Off),
            0x01 => Ok(Self::On),
            0x02 => Ok(Self::NotSupported),
            0x03 => Ok(Self::Required),
            _ => Err(ProtocolError::InvalidField {
                field: "encryption level",
                value: u32::from(value),
            }),
        }
    }

    /// Check if encryption is required.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self, Self::On | Self::Required)
    }
}

/// Outcome of comparing the client's and the server's ENCRYPT values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedEncryption {
    /// The connection stays on plain TCP.
    None,
    /// TLS protects the LOGIN7 exchange and is then dropped.
    LoginOnly,
    /// TLS protects the whole session.
    Full,
}

impl NegotiatedEncryption {
    /// Whether a TLS handshake must run before LOGIN7.
    #[must_use]
    pub const fn needs_handshake(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Resolve the encryption mode from both sides of the PRELOGIN exchange.
pub fn negotiate_encryption(
    client: EncryptionLevel,
    server: EncryptionLevel,
) -> Result<NegotiatedEncryption, ProtocolError> {
    use EncryptionLevel::{NotSupported, Off, On, Required};
    match (client, server) {
        (On | Required, NotSupported) => Err(ProtocolError::EncryptionNotSupported),
        (NotSupported, On | Required) => Err(ProtocolError::EncryptionNotSupported),
        (NotSupported, _) | (Off, NotSupported) => Ok(NegotiatedEncryption::None),
        (Off, Off) => Ok(NegotiatedEncryption::LoginOnly),
        _ => Ok(NegotiatedEncryption::Full),
    }
}

/// Version block carried in the VERSION option.
///
/// Major, minor and build are big-endian on the wire, the sub-build is
/// little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreLoginVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Build number.
    pub build: u16,
    /// Sub-build number.
    pub sub_build: u16,
}

impl PreLoginVersion {
    /// The version this client reports.
    pub const CLIENT: Self = Self {
        major: 6,
        minor: 0,
        build: 0,
        sub_build: 0,
    };

    fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.major);
        dst.put_u8(self.minor);
        dst.put_u16(self.build);
        dst.put_u16_le(self.sub_build);
    }

    fn decode(mut src: &[u8]) -> Result<Self, ProtocolError> {
        if src.len() < 6 {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(Self {
            major: src.get_u8(),
            minor: src.get_u8(),
            build: src.get_u16(),
            sub_build: src.get_u16_le(),
        })
    }
}

/// Distributed tracing ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceId {
    /// Connection ID (GUID bytes).
    pub connection_id: [u8; 16],
    /// Activity ID (GUID bytes).
    pub activity_id: [u8; 16],
    /// Activity sequence.
    pub activity_sequence: u32,
}

impl TraceId {
    /// Wire size of the TRACEID option.
    pub const SIZE: usize = 36;
}

/// Client PRELOGIN request.
///
/// All seven options are always sent, in id order.
#[derive(Debug, Clone)]
pub struct PreLogin {
    /// Reported client version.
    pub version: PreLoginVersion,
    /// Requested encryption level.
    pub encryption: EncryptionLevel,
    /// Instance name, empty for the default instance.
    pub instance: String,
    /// Client thread id.
    pub thread_id: u32,
    /// Request MARS.
    pub mars: bool,
    /// Tracing identifiers.
    pub trace_id: TraceId,
    /// Value of the FEDAUTHREQUIRED option.
    pub fed_auth_required: bool,
}

impl Default for PreLogin {
    fn default() -> Self {
        Self::new()
    }
}

impl PreLogin {
    /// Create a request with the client defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: PreLoginVersion::CLIENT,
            encryption: EncryptionLevel::Off,
            instance: String::new(),
            thread_id: 1234,
            mars: false,
            trace_id: TraceId {
                activity_sequence: 123,
                ..TraceId::default()
            },
            fed_auth_required: true,
        }
    }

    /// Set the encryption level.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Set the thread id.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: u32) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Set the trace id.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Set the instance name.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Encode the request payload (without packet header).
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut data = BytesMut::with_capacity(64);
        let mut entries: Vec<(PreLoginOption, usize, usize)> = Vec::with_capacity(7);
        let mut push = |option: PreLoginOption, data: &mut BytesMut, write: &dyn Fn(&mut BytesMut)| {
            let start = data.len();
            write(data);
            entries.push((option, start, data.len() - start));
        };

        push(PreLoginOption::Version, &mut data, &|d| self.version.encode(d));
        push(PreLoginOption::Encryption, &mut data, &|d| {
            d.put_u8(self.encryption as u8)
        });
        push(PreLoginOption::Instance, &mut data, &|d| {
            d.put_slice(self.instance.as_bytes());
            d.put_u8(0);
        });
        push(PreLoginOption::ThreadId, &mut data, &|d| d.put_u32(self.thread_id));
        push(PreLoginOption::Mars, &mut data, &|d| d.put_u8(u8::from(self.mars)));
        push(PreLoginOption::TraceId, &mut data, &|d| {
            d.put_slice(&self.trace_id.connection_id);
            d.put_slice(&self.trace_id.activity_id);
            d.put_u32_le(self.trace_id.activity_sequence);
        });
        push(PreLoginOption::FedAuthRequired, &mut data, &|d| {
            d.put_u8(u8::from(self.fed_auth_required))
        });

        let directory_len = entries.len() * OPTION_ENTRY_SIZE + 1;
        let mut buf = BytesMut::with_capacity(directory_len + data.len());
        for (option, start, len) in &entries {
            buf.put_u8(*option as u8);
            buf.put_u16((directory_len + start) as u16);
            buf.put_u16(*len as u16);
        }
        buf.put_u8(PreLoginOption::Terminator as u8);
        buf.put_slice(&data);
        buf.freeze()
    }
}

/// Server PRELOGIN response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreLoginResponse {
    /// Server product version.
    pub version: Option<PreLoginVersion>,
    /// Server encryption level.
    pub encryption: EncryptionLevel,
    /// Instance validation byte or name, if sent.
    pub instance: Option<Bytes>,
    /// Echoed thread id.
    pub thread_id: Option<u32>,
    /// MARS enabled by the server.
    pub mars: bool,
    /// Federated authentication required by the server.
    pub fed_auth_required: bool,
    /// Server nonce.
    pub nonce: Option<[u8; 32]>,
}

impl PreLoginResponse {
    /// Decode a server response payload.
    ///
    /// At most [`MAX_PRELOGIN_OPTIONS`] directory entries are accepted before
    /// the terminator.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut directory = payload;
        let mut entries: Vec<(PreLoginOption, usize, usize)> =
            Vec::with_capacity(MAX_PRELOGIN_OPTIONS);

        loop {
            if !directory.has_remaining() {
                return Err(ProtocolError::UnexpectedEof);
            }
            let id = directory.get_u8();
            if id == PreLoginOption::Terminator as u8 {
                break;
            }
            if entries.len() == MAX_PRELOGIN_OPTIONS {
                return Err(ProtocolError::InvalidPreloginOption(id));
            }
            if directory.remaining() < 4 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let option = PreLoginOption::from_u8(id)?;
            let offset = directory.get_u16() as usize;
            let length = directory.get_u16() as usize;
            entries.push((option, offset, length));
        }

        let mut response = Self::default();
        for (option, offset, length) in entries {
            let value = payload.get(offset..offset + length).ok_or(
                ProtocolError::PreloginOutOfBounds {
                    option: option as u8,
                },
            )?;
            match option {
                PreLoginOption::Version => {
                    response.version = Some(PreLoginVersion::decode(value)?);
                }
                PreLoginOption::Encryption => {
                    let byte = *value.first().ok_or(ProtocolError::UnexpectedEof)?;
                    response.encryption = EncryptionLevel::from_u8(byte)?;
                }
                PreLoginOption::Instance => {
                    response.instance = Some(Bytes::copy_from_slice(value));
                }
                PreLoginOption::ThreadId if length >= 4 => {
                    response.thread_id = Some((&value[..4]).get_u32());
                }
                PreLoginOption::Mars => {
                    response.mars = value.first() == Some(&1);
                }
                PreLoginOption::FedAuthRequired => {
                    response.fed_auth_required = match value.first() {
                        Some(0) => false,
                        Some(1) => true,
                        Some(&other) => {
                            return Err(ProtocolError::InvalidField {
                                field: "FEDAUTHREQUIRED",
                                value: u32::from(other),
                            });
                        }
                        None => return Err(ProtocolError::UnexpectedEof),
                    };
                }
                PreLoginOption::Nonce if length >= 32 => {
                    let mut nonce = [0u8; 32];
                    nonce.copy_from_slice(&value[..32]);
                    response.nonce = Some(nonce);
                }
                _ => {}
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let encoded = PreLogin::new().with_encryption(EncryptionLevel::On).encode();

        // Seven 5-byte entries plus the terminator.
        assert_eq!(encoded[35], 0xFF);
        // VERSION at 36, 6 bytes.
        assert_eq!(&encoded[0..5], &[0x00, 0x00, 36, 0x00, 6]);
        // ENCRYPT at 42, 1 byte.
        assert_eq!(&encoded[5..10], &[0x01, 0x00, 42, 0x00, 1]);
        // INSTANCE at 43, 1 byte (terminator only).
        assert_eq!(&encoded[10..15], &[0x02, 0x00, 43, 0x00, 1]);
        // THREADID at 44, 4 bytes.
        assert_eq!(&encoded[15..20], &[0x03, 0x00, 44, 0x00, 4]);
        // MARS at 48.
        assert_eq!(&encoded[20..25], &[0x04, 0x00, 48, 0x00, 1]);
        // TRACEID at 49, 36 bytes.
        assert_eq!(&encoded[25..30], &[0x05, 0x00, 49, 0x00, 36]);
        // FEDAUTHREQUIRED at 85.
        assert_eq!(&encoded[30..35], &[0x06, 0x00, 85, 0x00, 1]);
        assert_eq!(encoded.len(), 86);

        assert_eq!(&encoded[36..42], &[6, 0, 0, 0, 0, 0]);
        assert_eq!(encoded[42], EncryptionLevel::On as u8);
        assert_eq!(encoded[43], 0);
        assert_eq!(&encoded[44..48], &1234u32.to_be_bytes());
        assert_eq!(encoded[48], 0);
        assert_eq!(&encoded[81..85], &123u32.to_le_bytes());
        assert_eq!(encoded[85], 1);
    }

    #[test]
    fn test_request_decodes_as_response() {
        let encoded = PreLogin::new().with_thread_id(7).encode();
        let decoded = PreLoginResponse::decode(&encoded).unwrap();
        assert_eq!(decoded.version, Some(PreLoginVersion::CLIENT));
        assert_eq!(decoded.encryption, EncryptionLevel::Off);
        assert_eq!(decoded.thread_id, Some(7));
        assert!(!decoded.mars);
        assert!(decoded.fed_auth_required);
    }

    #[test]
    fn test_response_out_of_order_options() {
        use bytes::BufMut;

        let mut buf = BytesMut::new();
        buf.put_u8(PreLoginOption::Encryption as u8);
        buf.put_u16(11);
        buf.put_u16(1);
        buf.put_u8(PreLoginOption::Version as u8);
        buf.put_u16(12);
        buf.put_u16(6);
        buf.put_u8(0xFF);
        buf.put_u8(0x02);
        buf.put_slice(&[16, 0, 0x10, 0x00, 0x01, 0x00]);

        let decoded = PreLoginResponse::decode(&buf).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::NotSupported);
        let version = decoded.version.unwrap();
        assert_eq!((version.major, version.build, version.sub_build), (16, 0x1000, 1));
    }

    #[test]
    fn test_fed_auth_required_must_be_boolean() {
        use bytes::BufMut;

        let response = |value: u8| {
            let mut buf = BytesMut::new();
            buf.put_u8(PreLoginOption::FedAuthRequired as u8);
            buf.put_u16(6);
            buf.put_u16(1);
            buf.put_u8(0xFF);
            buf.put_u8(value);
            buf
        };

        assert!(!PreLoginResponse::decode(&response(0)).unwrap().fed_auth_required);
        assert!(PreLoginResponse::decode(&response(1)).unwrap().fed_auth_required);
        assert_eq!(
            PreLoginResponse::decode(&response(2)),
            Err(ProtocolError::InvalidField {
                field: "FEDAUTHREQUIRED",
                value: 2
            })
        );
    }

    #[test]
    fn test_response_accepts_all_eight_options() {
        let mut buf = BytesMut::new();
        let data_start = 8 * 5 + 1;
        for id in 0u8..8 {
            buf.put_u8(id);
            buf.put_u16(data_start as u16);
            buf.put_u16(if id == 7 { 0 } else { 1 });
        }
        buf.put_u8(0xFF);
        buf.put_u8(0x00);
        // VERSION needs six bytes; give it a separate block.
        let mut fixed = buf.to_vec();
        fixed[1..3].copy_from_slice(&((data_start + 1) as u16).to_be_bytes());
        fixed[3..5].copy_from_slice(&6u16.to_be_bytes());
        fixed.extend_from_slice(&[15, 0, 0, 0, 0, 0]);

        let decoded = PreLoginResponse::decode(&fixed).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::Off);
        assert_eq!(decoded.version.unwrap().major, 15);
    }

    #[test]
    fn test_response_rejects_ninth_option() {
        let mut buf = BytesMut::new();
        for _ in 0..9 {
            buf.put_u8(0x04);
            buf.put_u16(0);
            buf.put_u16(0);
        }
        buf.put_u8(0xFF);
        assert_eq!(
            PreLoginResponse::decode(&buf),
            Err(ProtocolError::InvalidPreloginOption(0x04))
        );
    }

    #[test]
    fn test_response_offset_out_of_bounds() {
        let raw = [0x01, 0x00, 0x40, 0x00, 0x01, 0xFF];
        assert_eq!(
            PreLoginResponse::decode(&raw),
            Err(ProtocolError::PreloginOutOfBounds { option: 0x01 })
        );
    }

    #[test]
    fn test_negotiate_encryption() {
        use EncryptionLevel::*;
        assert_eq!(
            negotiate_encryption(Off, Off).unwrap(),
            NegotiatedEncryption::LoginOnly
        );
        assert_eq!(
            negotiate_encryption(Off, NotSupported).unwrap(),
            NegotiatedEncryption::None
        );
        assert_eq!(
            negotiate_encryption(NotSupported, NotSupported).unwrap(),
            NegotiatedEncryption::None
        );
        assert_eq!(
            negotiate_encryption(Off, Required).unwrap(),
            NegotiatedEncryption::Full
        );
        assert_eq!(
            negotiate_encryption(Required, NotSupported),
            Err(ProtocolError::EncryptionNotSupported)
        );
        assert_eq!(
            negotiate_encryption(On, Off).unwrap(),
            NegotiatedEncryption::Full
        );
    }
}
