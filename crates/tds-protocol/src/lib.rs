//! # tds-protocol
//!
//! Wire structures of the MS-TDS (Tabular Data Stream) protocol used by
//! Microsoft SQL Server.
//!
//! This crate holds packet headers, the PRELOGIN and LOGIN7 messages, the
//! token length rule, token bodies and collation handling. It is
//! intentionally IO-agnostic: everything here works on `bytes::Buf` and
//! `bytes::BufMut`, and higher-level crates add the transport.
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use tds_protocol::{PacketHeader, PacketStatus, PacketType};
//!
//! let header = PacketHeader::new(PacketType::PreLogin, PacketStatus::END_OF_MESSAGE, 100);
//! let mut buf = BytesMut::new();
//! header.encode(&mut buf);
//! assert_eq!(&buf[..4], &[0x12, 0x01, 0x00, 100]);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod collation;
pub mod column;
pub mod error;
pub mod feature;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod token;
pub mod types;
pub mod version;

pub use collation::{CodePageEncoding, Collation};
pub use column::{
    CekEntry, CekTable, CekValue, ColumnMetadata, ColumnMetadataSet, ColumnValue, CryptoMetadata,
    MultiPartTableName, TypeInfo, ValueLength, XmlSchemaCollection,
};
pub use error::ProtocolError;
pub use feature::{FeatureAck, FeatureExtension, FeatureId, FeatureRequests};
pub use login7::{Login7, OptionFlags1, OptionFlags2, OptionFlags3, TypeFlags};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus,
    PacketType,
};
pub use prelogin::{
    EncryptionLevel, NegotiatedEncryption, PreLogin, PreLoginOption, PreLoginResponse,
    PreLoginVersion, TraceId, negotiate_encryption,
};
pub use token::{
    Done, DoneStatus, EnvChange, EnvChangeType, LengthPrefix, LengthRule, LoginAck,
    ServerMessage, TokenLength, TokenType,
};
pub use types::{ColumnFlags, TypeId, Updateable};
pub use version::TdsVersion;
