//! Scripted TDS server.
//!
//! [`MockServer`] plays the server half of a login over any async stream
//! (a `tokio::io::duplex` pipe or an accepted socket) and hands the stream
//! back so the test can script the rest of the conversation with
//! [`read_batch`] and [`write_message`].
//!
//! ```rust,ignore
//! let (client, server) = tokio::io::duplex(64 * 1024);
//! let mock = MockServer::new(ServerOptions::default());
//! tokio::spawn(async move {
//!     let mut login = mock.accept_login(server).await?;
//!     let sql = read_batch(&mut login.stream).await?;
//!     write_message(&mut login.stream, PacketType::TabularResult, &response, 4096).await
//! });
//! ```

use bytes::{Buf, Bytes, BytesMut};
use mssql_codec::{Message, MessageAssembler, Packet, PacketCodec};
use tds_protocol::{
    EncryptionLevel, EnvChangeType, NegotiatedEncryption, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType, PreLoginResponse, TdsVersion, negotiate_encryption,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::tls::TestCertificate;
use crate::tokens::{LATIN1_COLLATION, ResponseBuilder, prelogin_response};

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent something the script did not expect.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Certificate or handshake setup failed.
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// A stream the server can keep talking on after login, plain or TLS.
pub trait ServerIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ServerIo for T {}

/// Boxed server stream.
pub type BoxedStream = Box<dyn ServerIo>;

/// Server behaviour during login.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// ENCRYPT value sent in PRELOGIN.
    pub encryption: EncryptionLevel,
    /// MARS value sent in PRELOGIN.
    pub mars: bool,
    /// Certificate for TLS; required unless encryption resolves to none.
    pub certificate: Option<TestCertificate>,
    /// Database reported after login.
    pub database: String,
    /// Program name in LOGINACK.
    pub server_name: String,
    /// Version in LOGINACK.
    pub tds_version: TdsVersion,
    /// Packet size for the server's own packets and the ENVCHANGE.
    pub packet_size: u32,
    /// FEATUREEXTACK entries to send.
    pub features: Vec<(u8, Vec<u8>)>,
    /// Answer LOGIN7 with an error instead of LOGINACK.
    pub reject_login: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            encryption: EncryptionLevel::NotSupported,
            mars: false,
            certificate: None,
            database: "master".into(),
            server_name: "Microsoft SQL Server".into(),
            tds_version: TdsVersion::V7_4,
            packet_size: 4096,
            features: Vec::new(),
            reject_login: false,
        }
    }
}

impl ServerOptions {
    /// Set the PRELOGIN encryption level.
    #[must_use]
    pub fn with_encryption(mut self, encryption: EncryptionLevel) -> Self {
        self.encryption = encryption;
        self
    }

    /// Enable MARS in PRELOGIN.
    #[must_use]
    pub fn with_mars(mut self, mars: bool) -> Self {
        self.mars = mars;
        self
    }

    /// Serve TLS with this certificate.
    #[must_use]
    pub fn with_certificate(mut self, certificate: TestCertificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// Report this database after login.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Acknowledge a feature in FEATUREEXTACK.
    #[must_use]
    pub fn with_feature(mut self, id: u8, data: impl Into<Vec<u8>>) -> Self {
        self.features.push((id, data.into()));
        self
    }

    /// Refuse the login.
    #[must_use]
    pub fn rejecting_login(mut self) -> Self {
        self.reject_login = true;
        self
    }
}

/// What the server saw during login.
pub struct LoginExchange {
    /// The stream, ready for post-login traffic.
    pub stream: BoxedStream,
    /// Encryption the server settled on.
    pub encryption: NegotiatedEncryption,
    /// The client's PRELOGIN request.
    pub prelogin: PreLoginResponse,
    /// The raw LOGIN7 message.
    pub login7: Message,
}

impl std::fmt::Debug for LoginExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginExchange")
            .field("encryption", &self.encryption)
            .field("prelogin", &self.prelogin)
            .field("login7", &self.login7.len())
            .finish_non_exhaustive()
    }
}

/// A scripted server for one connection.
#[derive(Debug, Clone)]
pub struct MockServer {
    options: ServerOptions,
}

impl MockServer {
    /// Create a server with the given options.
    #[must_use]
    pub fn new(options: ServerOptions) -> Self {
        Self { options }
    }

    /// Server options.
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Serve PRELOGIN, the optional TLS handshake and LOGIN7.
    pub async fn accept_login<S>(&self, mut stream: S) -> Result<LoginExchange>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let packet_size = self.options.packet_size as usize;

        let request = expect(read_message(&mut stream).await?, PacketType::PreLogin)?;
        // A client request parses with the response decoder.
        let prelogin = PreLoginResponse::decode(&request.payload)
            .map_err(|e| MockServerError::Protocol(e.to_string()))?;
        write_message(
            &mut stream,
            PacketType::TabularResult,
            &prelogin_response(self.options.encryption, self.options.mars),
            packet_size,
        )
        .await?;

        let encryption = negotiate_encryption(prelogin.encryption, self.options.encryption)
            .map_err(|e| MockServerError::Protocol(e.to_string()))?;
        tracing::debug!(?encryption, "mock server PRELOGIN done");

        let (mut stream, login7): (BoxedStream, Message) = match encryption {
            NegotiatedEncryption::None => {
                let login7 = read_message(&mut stream).await?;
                (Box::new(stream) as BoxedStream, login7)
            }
            NegotiatedEncryption::LoginOnly => {
                let mut tls = self.certificate()?.accept(stream, packet_size).await?;
                let login7 = read_message(&mut tls).await?;
                let (tunnel, _) = tls.into_inner();
                (Box::new(tunnel.into_inner()) as BoxedStream, login7)
            }
            NegotiatedEncryption::Full => {
                let mut tls = self.certificate()?.accept(stream, packet_size).await?;
                let login7 = read_message(&mut tls).await?;
                (Box::new(tls) as BoxedStream, login7)
            }
        };
        let login7 = expect(login7, PacketType::Tds7Login)?;

        write_message(
            &mut stream,
            PacketType::TabularResult,
            &self.login_response(),
            packet_size,
        )
        .await?;

        Ok(LoginExchange {
            stream,
            encryption,
            prelogin,
            login7,
        })
    }

    fn certificate(&self) -> Result<&TestCertificate> {
        self.options
            .certificate
            .as_ref()
            .ok_or_else(|| MockServerError::Tls("no certificate configured".into()))
    }

    fn login_response(&self) -> Bytes {
        let options = &self.options;
        if options.reject_login {
            return ResponseBuilder::new()
                .error(18456, 14, "Login failed for user 'sa'.")
                .done(0)
                .build();
        }

        let features: Vec<(u8, &[u8])> = options
            .features
            .iter()
            .map(|(id, data)| (*id, data.as_slice()))
            .collect();
        let mut response = ResponseBuilder::new()
            .env_change(EnvChangeType::Database, &options.database, "master")
            .info(
                5701,
                &format!("Changed database context to '{}'.", options.database),
            )
            .collation(LATIN1_COLLATION)
            .login_ack(options.tds_version, &options.server_name)
            .packet_size(options.packet_size, 4096);
        if !features.is_empty() {
            response = response.feature_ext_ack(&features);
        }
        response.done(0).build()
    }
}

fn expect(message: Message, packet_type: PacketType) -> Result<Message> {
    if message.packet_type != packet_type {
        return Err(MockServerError::Protocol(format!(
            "expected {packet_type:?}, got {:?}",
            message.packet_type
        )));
    }
    Ok(message)
}

/// Read one complete message.
///
/// Packets are read one at a time so nothing past the final packet is
/// consumed.
pub async fn read_message<S: AsyncRead + Unpin + ?Sized>(stream: &mut S) -> Result<Message> {
    let mut codec = PacketCodec::new();
    let mut assembler = MessageAssembler::new();
    let mut frame = BytesMut::new();
    loop {
        frame.resize(PACKET_HEADER_SIZE, 0);
        stream.read_exact(&mut frame).await?;
        let length = u16::from_be_bytes([frame[2], frame[3]]);
        frame.resize(usize::from(length).max(PACKET_HEADER_SIZE), 0);
        stream.read_exact(&mut frame[PACKET_HEADER_SIZE..]).await?;

        let packet = codec
            .decode(&mut frame)
            .map_err(|e| MockServerError::Protocol(e.to_string()))?
            .ok_or_else(|| MockServerError::Protocol("truncated packet".into()))?;
        if let Some(message) = assembler.push(packet) {
            return Ok(message);
        }
    }
}

/// Write `payload` as one message split into `packet_size`-byte packets.
///
/// An empty payload still goes out as one packet.
pub async fn write_message<S: AsyncWrite + Unpin + ?Sized>(
    stream: &mut S,
    packet_type: PacketType,
    payload: &[u8],
    packet_size: usize,
) -> Result<()> {
    let max_payload = packet_size.saturating_sub(PACKET_HEADER_SIZE).max(1);
    let chunk_count = payload.len().div_ceil(max_payload).max(1);
    let mut codec = PacketCodec::new();
    let mut buf = BytesMut::with_capacity(packet_size);

    for index in 0..chunk_count {
        let start = index * max_payload;
        let chunk = &payload[start..payload.len().min(start + max_payload)];
        let status = if index + 1 == chunk_count {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        // The codec fills in the length.
        let header = PacketHeader::new(packet_type, status, 0).with_packet_id((index + 1) as u8);
        codec
            .encode(Packet::new(header, Bytes::copy_from_slice(chunk)), &mut buf)
            .map_err(|e| MockServerError::Protocol(e.to_string()))?;
        stream.write_all(&buf).await?;
        buf.clear();
    }
    stream.flush().await?;
    Ok(())
}

/// Read a SQL_BATCH message and return its text.
pub async fn read_batch<S: AsyncRead + Unpin + ?Sized>(stream: &mut S) -> Result<String> {
    let message = expect(read_message(stream).await?, PacketType::SqlBatch)?;
    decode_sql_batch(message.payload)
}

/// Strip ALL_HEADERS and decode the UTF-16LE batch text.
pub fn decode_sql_batch(mut payload: Bytes) -> Result<String> {
    if payload.len() < 4 {
        return Err(MockServerError::Protocol("batch too short".into()));
    }
    let headers_len = (&payload[..4]).get_u32_le() as usize;
    if headers_len > payload.len() {
        return Err(MockServerError::Protocol(format!(
            "ALL_HEADERS length {headers_len} exceeds batch"
        )));
    }
    payload.advance(headers_len);

    if payload.len() % 2 != 0 {
        return Err(MockServerError::Protocol(
            "Invalid UTF-16 SQL text length".to_string(),
        ));
    }
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|_| MockServerError::Protocol("Invalid UTF-16 SQL text".to_string()))
}
