//! Streaming token decoder.
//!
//! Tokens are read straight off the [`Channel`], so a token may span any
//! number of packets. Every token type the server can send is matched
//! explicitly; the ones this engine does not handle fail with
//! [`ProtocolError::UnsupportedToken`].
//!
//! # Example
//!
//! ```rust,ignore
//! let mut reader = TokenReader::new(&mut channel, &mut metadata);
//! loop {
//!     match reader.next_token().await? {
//!         Token::Row(values) => { /* ... */ }
//!         Token::Done(done) if !done.has_more() => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use mssql_codec::Channel;
use tds_protocol::codec::ensure;
use tds_protocol::column::{PLP_MARKER, PLP_NULL, TEXT_TIMESTAMP_LEN};
use tds_protocol::token::decode_order;
use tds_protocol::types::time_length_for_scale;
use tds_protocol::{
    CekEntry, CekTable, CekValue, Collation, ColumnFlags, ColumnMetadata, ColumnMetadataSet,
    ColumnValue, CryptoMetadata, Done, EnvChange, EnvChangeType, FeatureAck, LengthPrefix,
    LengthRule, LoginAck, MultiPartTableName, ProtocolError, ServerMessage, TokenLength,
    TokenType, TypeId, TypeInfo, ValueLength, XmlSchemaCollection,
};
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::metadata::ProtocolMetadata;

/// COLMETADATA count announcing "no metadata".
const NO_METADATA: u16 = 0xFFFF;

/// One decoded token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Server error.
    Error(ServerMessage),
    /// Informational message.
    Info(ServerMessage),
    /// Login acknowledgement.
    LoginAck(LoginAck),
    /// Environment change, already applied to the session.
    EnvChange(EnvChange),
    /// End of a statement.
    Done(Done),
    /// End of a stored procedure.
    DoneProc(Done),
    /// End of a statement inside a procedure.
    DoneInProc(Done),
    /// New column metadata; `None` when the server sent the no-metadata
    /// marker and the previous set stays current.
    ColMetaData(Option<Arc<ColumnMetadataSet>>),
    /// One row, in column order.
    Row(Vec<ColumnValue>),
    /// Feature acknowledgements, already registered with the session.
    FeatureExtAck(Vec<FeatureAck>),
    /// Procedure return status.
    ReturnStatus(i32),
    /// 1-based ordinals of ORDER BY columns.
    Order(Vec<u16>),
    /// Session state, kept opaque.
    SessionState(Bytes),
    /// Federated authentication info, kept opaque.
    FedAuthInfo(Bytes),
}

/// Decodes tokens from a channel, applying their side effects to the session
/// metadata.
pub struct TokenReader<'a, T> {
    channel: &'a mut Channel<T>,
    metadata: &'a mut ProtocolMetadata,
}

impl<'a, T: AsyncRead + Unpin> TokenReader<'a, T> {
    /// Borrow a channel and the session metadata.
    pub fn new(channel: &'a mut Channel<T>, metadata: &'a mut ProtocolMetadata) -> Self {
        Self { channel, metadata }
    }

    /// Decode the next token.
    pub async fn next_token(&mut self) -> Result<Token> {
        let type_byte = self.channel.read_u8().await?;
        let token_type = TokenType::from_u8(type_byte)?;
        let length = self.token_length(type_byte).await?;
        tracing::trace!(?token_type, ?length, "token");

        let token = match token_type {
            TokenType::Error => Token::Error(ServerMessage::decode(&mut self.body(length).await?)?),
            TokenType::Info => {
                let info = ServerMessage::decode(&mut self.body(length).await?)?;
                if info.class > 10 {
                    tracing::warn!(
                        number = info.number,
                        class = info.class,
                        "INFO token with error-level class"
                    );
                }
                Token::Info(info)
            }
            TokenType::LoginAck => {
                let ack = LoginAck::decode(&mut self.body(length).await?)?;
                self.metadata.tds_version = Some(ack.tds_version);
                Token::LoginAck(ack)
            }
            TokenType::EnvChange => {
                let change = EnvChange::decode(&mut self.body(length).await?)?;
                self.apply_env_change(&change)?;
                Token::EnvChange(change)
            }
            // The length class gives 8 bytes; TDS 7.2+ sends a 64-bit row
            // count, so the body is always 12.
            TokenType::Done => Token::Done(self.read_done().await?),
            TokenType::DoneProc => Token::DoneProc(self.read_done().await?),
            TokenType::DoneInProc => Token::DoneInProc(self.read_done().await?),
            TokenType::ReturnStatus => {
                let mut body = self.body(length).await?;
                ensure(&body, 4)?;
                Token::ReturnStatus(body.get_i32_le())
            }
            TokenType::Order => Token::Order(decode_order(&mut self.body(length).await?)?),
            TokenType::SessionState => Token::SessionState(self.body(length).await?),
            TokenType::FedAuthInfo => Token::FedAuthInfo(self.body(length).await?),
            TokenType::ColMetaData => {
                let count = match length {
                    TokenLength::Known(n) => n,
                    TokenLength::CallerDriven => {
                        return Err(ProtocolError::UnknownTokenLength(type_byte).into());
                    }
                };
                Token::ColMetaData(self.read_colmetadata(count).await?)
            }
            TokenType::Row => Token::Row(self.read_row(false).await?),
            TokenType::NbcRow => Token::Row(self.read_row(true).await?),
            TokenType::FeatureExtAck => Token::FeatureExtAck(self.read_feature_ext_ack().await?),
            TokenType::Offset
            | TokenType::AltMetaData
            | TokenType::DataClassification
            | TokenType::TabName
            | TokenType::ColInfo
            | TokenType::ReturnValue
            | TokenType::AltRow
            | TokenType::Sspi => return Err(ProtocolError::UnsupportedToken(type_byte).into()),
        };
        Ok(token)
    }

    /// Resolve the body length of a token from its type byte.
    async fn token_length(&mut self, type_byte: u8) -> Result<TokenLength> {
        Ok(match LengthRule::for_type_byte(type_byte)? {
            LengthRule::CallerDriven => TokenLength::CallerDriven,
            LengthRule::Zero => TokenLength::Known(0),
            LengthRule::Fixed(n) => TokenLength::Known(n),
            LengthRule::Prefixed(prefix) => {
                TokenLength::Known(self.read_prefix(prefix).await? as usize)
            }
        })
    }

    async fn body(&mut self, length: TokenLength) -> Result<Bytes> {
        match length {
            TokenLength::Known(n) => Ok(self.channel.read_bytes(n).await?),
            TokenLength::CallerDriven => Err(ProtocolError::UnexpectedEof.into()),
        }
    }

    async fn read_prefix(&mut self, prefix: LengthPrefix) -> Result<u32> {
        Ok(match prefix {
            LengthPrefix::U8 => u32::from(self.channel.read_u8().await?),
            LengthPrefix::U16 => u32::from(self.channel.read_u16_le().await?),
            LengthPrefix::I32 => self.channel.read_u32_le().await?,
        })
    }

    async fn read_done(&mut self) -> Result<Done> {
        let mut body = self.channel.read_bytes(Done::SIZE).await?;
        Ok(Done::decode(&mut body)?)
    }

    fn apply_env_change(&mut self, change: &EnvChange) -> Result<()> {
        tracing::debug!(kind = ?change.kind(), "environment change");
        match change {
            EnvChange::PacketSize { new, .. } if *new > 0 => {
                self.channel.set_packet_size(*new as usize)?;
            }
            EnvChange::SqlCollation { new, .. } => self.metadata.set_collation(*new),
            EnvChange::Text {
                kind: EnvChangeType::Database,
                new,
                ..
            } => self.metadata.database = Some(new.clone()),
            EnvChange::Binary {
                kind: EnvChangeType::BeginTransaction,
                new,
                ..
            } => {
                let mut descriptor = [0u8; 8];
                let n = new.len().min(8);
                descriptor[..n].copy_from_slice(&new[..n]);
                self.metadata.transaction_descriptor = u64::from_le_bytes(descriptor);
            }
            EnvChange::Binary {
                kind:
                    EnvChangeType::CommitTransaction
                    | EnvChangeType::RollbackTransaction
                    | EnvChangeType::DefectTransaction
                    | EnvChangeType::TransactionEnded,
                ..
            } => self.metadata.transaction_descriptor = 0,
            _ => {}
        }
        Ok(())
    }

    async fn read_feature_ext_ack(&mut self) -> Result<Vec<FeatureAck>> {
        let mut acks = Vec::new();
        loop {
            let id = self.channel.read_u8().await?;
            if id == 0xFF {
                return Ok(acks);
            }
            let len = self.channel.read_u32_le().await? as usize;
            let data = self.channel.read_bytes(len).await?;
            let feature_id = self.metadata.add_feature(id, data.clone())?;
            acks.push(FeatureAck { feature_id, data });
        }
    }

    async fn read_colmetadata(&mut self, count: usize) -> Result<Option<Arc<ColumnMetadataSet>>> {
        if count == usize::from(NO_METADATA) {
            return Ok(None);
        }

        let encrypted = self.metadata.is_column_encryption_enabled();
        let cek_table = if encrypted {
            Some(self.read_cek_table().await?)
        } else {
            None
        };

        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(self.read_column(encrypted).await?);
        }
        tracing::debug!(columns = columns.len(), "column metadata");

        let set = Arc::new(ColumnMetadataSet { columns, cek_table });
        self.metadata.columns = Some(Arc::clone(&set));
        Ok(Some(set))
    }

    async fn read_cek_table(&mut self) -> Result<CekTable> {
        let count = self.channel.read_u16_le().await?;
        let mut entries = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let database_id = self.channel.read_i32_le().await?;
            let cek_id = self.channel.read_i32_le().await?;
            let cek_version = self.channel.read_i32_le().await?;
            let mut md_version = [0u8; 8];
            self.channel.read_exact(&mut md_version).await?;

            let value_count = self.channel.read_u8().await?;
            let mut values = Vec::with_capacity(usize::from(value_count));
            for _ in 0..value_count {
                let key_len = self.channel.read_u16_le().await?;
                let encrypted_key = self.channel.read_bytes(usize::from(key_len)).await?;
                values.push(CekValue {
                    encrypted_key,
                    key_store_name: self.channel.read_b_varchar().await?,
                    key_path: self.channel.read_us_varchar().await?,
                    algorithm: self.channel.read_b_varchar().await?,
                });
            }
            entries.push(CekEntry {
                database_id,
                cek_id,
                cek_version,
                md_version,
                values,
            });
        }
        Ok(CekTable { entries })
    }

    async fn read_column(&mut self, encrypted: bool) -> Result<ColumnMetadata> {
        let user_type = self.channel.read_u32_le().await?;
        let first = self.channel.read_u8().await?;
        let second = self.channel.read_u8().await?;
        let flags = ColumnFlags::from_bytes(first, second);
        let type_info = self.read_type_info().await?;

        let table_name = if type_info.type_id.is_long() {
            Some(self.read_table_name().await?)
        } else {
            None
        };

        let crypto = if encrypted && flags.encrypted {
            Some(self.read_crypto_metadata().await?)
        } else {
            None
        };

        let name = self.channel.read_b_varchar().await?;
        Ok(ColumnMetadata {
            user_type,
            flags,
            type_info,
            table_name,
            crypto,
            name,
        })
    }

    async fn read_table_name(&mut self) -> Result<MultiPartTableName> {
        let parts = self.channel.read_u8().await?;
        let mut names = Vec::with_capacity(usize::from(parts));
        for _ in 0..parts {
            names.push(self.channel.read_us_varchar().await?);
        }
        Ok(MultiPartTableName::from_parts(names)?)
    }

    async fn read_crypto_metadata(&mut self) -> Result<CryptoMetadata> {
        let ordinal = self.channel.read_u16_le().await?;
        let user_type = self.channel.read_u32_le().await?;
        let base_type = self.read_type_info().await?;
        let algorithm = self.channel.read_u8().await?;
        let algorithm_name = if algorithm == 0 {
            Some(self.channel.read_b_varchar().await?)
        } else {
            None
        };
        Ok(CryptoMetadata {
            ordinal,
            user_type,
            base_type,
            algorithm,
            algorithm_name,
            encryption_type: self.channel.read_u8().await?,
            normalization_version: self.channel.read_u8().await?,
        })
    }

    async fn read_type_info(&mut self) -> Result<TypeInfo> {
        let type_byte = self.channel.read_u8().await?;
        let type_id = TypeId::from_u8(type_byte)?;

        match type_id {
            TypeId::Xml => {
                let mut info = TypeInfo::new(type_id, PLP_MARKER, ValueLength::Plp);
                if self.channel.read_u8().await? & 0x01 != 0 {
                    info.xml_schema = Some(XmlSchemaCollection {
                        database: self.channel.read_b_varchar().await?,
                        owning_schema: self.channel.read_b_varchar().await?,
                        name: self.channel.read_us_varchar().await?,
                    });
                }
                return Ok(info);
            }
            TypeId::Date => {
                return Ok(TypeInfo::new(
                    type_id,
                    3,
                    ValueLength::Prefixed(LengthPrefix::U8),
                ));
            }
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                let scale = self.channel.read_u8().await?;
                let mut length = time_length_for_scale(scale)?;
                match type_id {
                    TypeId::DateTime2 => length += 3,
                    TypeId::DateTimeOffset => length += 5,
                    _ => {}
                }
                let mut info =
                    TypeInfo::new(type_id, length, ValueLength::Prefixed(LengthPrefix::U8));
                info.scale = scale;
                return Ok(info);
            }
            TypeId::Udt => {
                let max_len = self.channel.read_u16_le().await?;
                // Database, schema, type name, assembly-qualified name.
                for _ in 0..3 {
                    self.channel.read_b_varchar().await?;
                }
                self.channel.read_us_varchar().await?;
                let value_length = if u32::from(max_len) == PLP_MARKER {
                    ValueLength::Plp
                } else {
                    ValueLength::Prefixed(LengthPrefix::U16)
                };
                return Ok(TypeInfo::new(type_id, u32::from(max_len), value_length));
            }
            _ => {}
        }

        let mut info = match LengthRule::for_type_byte(type_byte)? {
            LengthRule::Zero => TypeInfo::new(type_id, 0, ValueLength::Fixed(0)),
            LengthRule::Fixed(n) => TypeInfo::new(type_id, n as u32, ValueLength::Fixed(n)),
            LengthRule::Prefixed(prefix) => {
                let length = self.read_prefix(prefix).await?;
                let value_length = if prefix == LengthPrefix::U16
                    && length == PLP_MARKER
                    && type_id.allows_plp()
                {
                    ValueLength::Plp
                } else if type_id.is_long() {
                    ValueLength::TextPointer
                } else {
                    ValueLength::Prefixed(prefix)
                };
                TypeInfo::new(type_id, length, value_length)
            }
            LengthRule::CallerDriven => {
                return Err(ProtocolError::UnknownTokenLength(type_byte).into());
            }
        };

        if type_id.is_decimal() {
            info.precision = self.channel.read_u8().await?;
            info.scale = self.channel.read_u8().await?;
        }

        if type_id.is_char() {
            let mut raw = self.channel.read_bytes(Collation::SIZE).await?;
            let collation = Collation::decode(&mut raw)?;
            if !type_id.is_unicode() {
                info.encoding = Some(self.metadata.encoding_for(collation)?);
            }
        }

        Ok(info)
    }

    async fn read_row(&mut self, compressed: bool) -> Result<Vec<ColumnValue>> {
        let columns = self
            .metadata
            .columns
            .clone()
            .ok_or(ProtocolError::MissingColumnMetadata)?;

        let bitmap = if compressed {
            self.channel.read_bytes(columns.len().div_ceil(8)).await?
        } else {
            Bytes::new()
        };

        let mut values = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            let null = compressed && bitmap[i / 8] & (1 << (i % 8)) != 0;
            let value = if null {
                ColumnValue::Null
            } else {
                self.read_value(&column.type_info).await?
            };
            values.push(value);
        }
        Ok(values)
    }

    async fn read_value(&mut self, type_info: &TypeInfo) -> Result<ColumnValue> {
        let raw = match type_info.value_length {
            ValueLength::Fixed(0) => return Ok(ColumnValue::Null),
            ValueLength::Fixed(n) => self.channel.read_bytes(n).await?,
            ValueLength::Prefixed(prefix) => {
                let len = self.read_prefix(prefix).await?;
                if len == prefix.null_marker() {
                    return Ok(ColumnValue::Null);
                }
                self.channel.read_bytes(len as usize).await?
            }
            ValueLength::TextPointer => {
                let pointer_len = self.channel.read_u8().await?;
                if pointer_len == 0 {
                    return Ok(ColumnValue::Null);
                }
                self.channel
                    .skip(usize::from(pointer_len) + TEXT_TIMESTAMP_LEN)
                    .await?;
                let len = self.channel.read_u32_le().await?;
                self.channel.read_bytes(len as usize).await?
            }
            ValueLength::Plp => match self.read_plp().await? {
                Some(raw) => raw,
                None => return Ok(ColumnValue::Null),
            },
        };
        Ok(ColumnValue::from_raw(type_info, raw)?)
    }

    /// Reassemble a PLP value from its chunks.
    async fn read_plp(&mut self) -> Result<Option<Bytes>> {
        let total = self.channel.read_u64_le().await?;
        if total == PLP_NULL {
            return Ok(None);
        }
        let mut out = BytesMut::new();
        loop {
            let chunk = self.channel.read_u32_le().await? as usize;
            if chunk == 0 {
                return Ok(Some(out.freeze()));
            }
            let start = out.len();
            out.resize(start + chunk, 0);
            self.channel.read_exact(&mut out[start..]).await?;
        }
    }
}
