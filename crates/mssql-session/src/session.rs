//! The async protocol session.

use bytes::{BufMut, BytesMut};
use mssql_auth::CredentialProvider;
use mssql_codec::Channel;
use mssql_tls::{TlsConnector, Transport};
use tds_protocol::codec::write_utf16_string;
use tds_protocol::{
    DEFAULT_PACKET_SIZE, EnvChange, NegotiatedEncryption, PacketType, PreLoginResponse,
    ServerMessage, negotiate_encryption,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::login::{build_login7, build_prelogin};
use crate::metadata::ProtocolMetadata;
use crate::state::{LoginFlow, LoginState};
use crate::token_reader::{Token, TokenReader};

/// ALL_HEADERS block: total length, then one transaction descriptor header.
const ALL_HEADERS_LEN: u32 = 22;
const TRANSACTION_HEADER_LEN: u32 = 18;
const TRANSACTION_HEADER_TYPE: u16 = 0x0002;

/// How far [`ProtocolSession::pump`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpMode {
    /// Exactly one token.
    Once,
    /// Every token up to the end of the current message.
    UntilEndOfMessage,
}

/// One TDS connection: framing, TLS, login and token decoding.
///
/// Operations must not overlap. A future dropped before completion, or a
/// terminal error, leaves the session poisoned: later calls fail with
/// [`Error::Poisoned`].
#[derive(Debug)]
pub struct ProtocolSession<S> {
    channel: Channel<Transport<S>>,
    metadata: ProtocolMetadata,
    flow: LoginFlow,
    config: Config,
    in_flight: bool,
    env_changes: Vec<EnvChange>,
    infos: Vec<ServerMessage>,
}

impl ProtocolSession<TcpStream> {
    /// Open a TCP connection to the configured host within
    /// [`Config::connect_timeout`].
    pub async fn connect(config: Config) -> Result<Self> {
        let addr = (config.host.as_str(), config.port);
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "TCP connect timed out",
                ))
            })??;
        stream.set_nodelay(true)?;
        tracing::debug!(host = %config.host, port = config.port, "TCP connected");
        Self::new(stream, config)
    }
}

impl<S> ProtocolSession<S> {
    /// Wrap an established transport.
    pub fn new(stream: S, config: Config) -> Result<Self> {
        let mut flow = LoginFlow::new();
        flow.advance(LoginState::TcpConnected)?;
        Ok(Self {
            channel: Channel::new(Transport::Plain(stream), DEFAULT_PACKET_SIZE),
            metadata: ProtocolMetadata::new(),
            flow,
            config,
            in_flight: false,
            env_changes: Vec::new(),
            infos: Vec::new(),
        })
    }

    /// Current login state.
    #[must_use]
    pub fn state(&self) -> LoginState {
        self.flow.state()
    }

    /// The login state machine and its transcript.
    #[must_use]
    pub fn flow(&self) -> &LoginFlow {
        &self.flow
    }

    /// Whether login completed.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.flow.is_authenticated()
    }

    /// Whether the server enabled MARS in PRELOGIN.
    #[must_use]
    pub fn is_mars_enabled(&self) -> bool {
        self.metadata.mars
    }

    /// Whether traffic is currently encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.channel.get_ref().is_tls()
    }

    /// Whether an earlier operation left the session unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.in_flight
    }

    /// Session metadata learned from the server.
    #[must_use]
    pub fn metadata(&self) -> &ProtocolMetadata {
        &self.metadata
    }

    /// Configuration this session was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.channel.packet_size()
    }

    /// Payload bytes left in the current incoming packet.
    #[must_use]
    pub fn packet_data_left(&self) -> usize {
        self.channel.packet_data_left()
    }

    /// Environment changes received since the last call.
    pub fn take_env_changes(&mut self) -> Vec<EnvChange> {
        std::mem::take(&mut self.env_changes)
    }

    /// INFO messages received since the last call.
    pub fn take_infos(&mut self) -> Vec<ServerMessage> {
        std::mem::take(&mut self.infos)
    }

    /// Recover the raw transport, if it is still reachable.
    pub fn into_inner(self) -> Option<S> {
        self.channel.into_inner().into_inner()
    }

    fn enter(&mut self) -> Result<()> {
        if self.in_flight {
            return Err(Error::Poisoned);
        }
        self.in_flight = true;
        Ok(())
    }

    fn leave<R>(&mut self, result: Result<R>) -> Result<R> {
        match &result {
            Err(e) if e.is_terminal() => {
                tracing::debug!(error = %e, "session poisoned");
            }
            _ => self.in_flight = false,
        }
        result
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ProtocolSession<S> {
    /// Run PRELOGIN, the optional TLS handshake and LOGIN7 to completion.
    pub async fn login(&mut self, credentials: &dyn CredentialProvider) -> Result<()> {
        self.enter()?;
        let result = self.run_login(credentials).await;
        self.leave(result)
    }

    async fn run_login(&mut self, credentials: &dyn CredentialProvider) -> Result<()> {
        let prelogin = build_prelogin(&self.config);
        self.channel
            .write_message(PacketType::PreLogin, &prelogin.encode())
            .await?;
        self.flow.advance(LoginState::PreloginSent)?;

        let payload = self.channel.read_message().await?;
        let response = PreLoginResponse::decode(&payload)?;
        self.flow.advance(LoginState::PreloginReceived)?;
        self.metadata.mars = response.mars;
        self.metadata.fed_auth_required = response.fed_auth_required;

        let encryption = negotiate_encryption(self.config.encryption, response.encryption)?;
        tracing::debug!(
            client = ?self.config.encryption,
            server = ?response.encryption,
            ?encryption,
            mars = response.mars,
            "PRELOGIN negotiated"
        );
        self.flow.negotiated(encryption)?;

        if encryption.needs_handshake() {
            self.flow.advance(LoginState::TlsHandshaking)?;
            let connector = TlsConnector::new(self.config.tls.clone())?;
            let packet_size = self.channel.packet_size();
            let server_name = self.config.tls_server_name().to_string();
            self.channel
                .get_mut()
                .enable_tls(&connector, &server_name, packet_size)
                .await?;
            self.flow.advance(LoginState::TlsActive)?;
        }

        let login = build_login7(&self.config, credentials)?.encode()?;
        self.channel
            .write_message(PacketType::Tds7Login, &login)
            .await?;
        self.flow.advance(LoginState::LoginSent)?;

        // The server answers LOGIN7 in clear under login-only encryption.
        if encryption == NegotiatedEncryption::LoginOnly {
            self.channel.get_mut().disable_tls();
            self.flow.disable_tls()?;
        }

        let tokens = self.read_response(PumpMode::UntilEndOfMessage).await?;
        let ack = tokens.iter().find_map(|token| match token {
            Token::LoginAck(ack) => Some(ack),
            _ => None,
        });
        let Some(ack) = ack else {
            return Err(Error::LoginRejected);
        };
        tracing::info!(
            server = %ack.prog_name,
            tds_version = ?ack.tds_version,
            packet_size = self.channel.packet_size(),
            encrypted = self.is_encrypted(),
            "login acknowledged"
        );
        self.flow.advance(LoginState::LoginAcknowledged)
    }

    /// Read tokens from the server.
    ///
    /// INFO and ENVCHANGE tokens are also collected for
    /// [`Self::take_infos`] and [`Self::take_env_changes`]. With
    /// [`PumpMode::UntilEndOfMessage`] the first ERROR token is returned as
    /// [`Error::Server`] once the message has been drained, so the session
    /// stays usable.
    pub async fn pump(&mut self, mode: PumpMode) -> Result<Vec<Token>> {
        self.enter()?;
        let result = self.read_response(mode).await;
        self.leave(result)
    }

    /// Read exactly one token.
    pub async fn next_token(&mut self) -> Result<Token> {
        self.enter()?;
        let result = TokenReader::new(&mut self.channel, &mut self.metadata)
            .next_token()
            .await;
        if let Ok(token) = &result {
            self.collect(token);
        }
        self.leave(result)
    }

    async fn read_response(&mut self, mode: PumpMode) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut first_error = None;
        loop {
            let token = TokenReader::new(&mut self.channel, &mut self.metadata)
                .next_token()
                .await?;
            self.collect(&token);
            if let Token::Error(message) = &token {
                first_error.get_or_insert_with(|| message.clone());
            }
            tokens.push(token);
            if mode == PumpMode::Once || self.channel.is_message_complete() {
                break;
            }
        }
        match first_error {
            Some(message) if mode == PumpMode::UntilEndOfMessage => Err(message.into()),
            _ => Ok(tokens),
        }
    }

    fn collect(&mut self, token: &Token) {
        match token {
            Token::Info(info) => {
                tracing::debug!(number = info.number, message = %info.message, "server info");
                self.infos.push(info.clone());
            }
            Token::EnvChange(change) => self.env_changes.push(change.clone()),
            _ => {}
        }
    }

    /// Send a SQL batch. The response is read with [`Self::pump`].
    pub async fn send_sql_batch(&mut self, sql: &str) -> Result<()> {
        self.enter()?;
        let payload = encode_sql_batch(sql, self.metadata.transaction_descriptor);
        let result = self
            .channel
            .write_message(PacketType::SqlBatch, &payload)
            .await
            .map_err(Error::from);
        self.leave(result)
    }

    /// Send a SQL batch and drain its response.
    pub async fn execute(&mut self, sql: &str) -> Result<Vec<Token>> {
        self.send_sql_batch(sql).await?;
        self.pump(PumpMode::UntilEndOfMessage).await
    }
}

/// SQL batch payload: ALL_HEADERS, then the UTF-16LE text.
fn encode_sql_batch(sql: &str, transaction_descriptor: u64) -> BytesMut {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN as usize + sql.len() * 2);
    buf.put_u32_le(ALL_HEADERS_LEN);
    buf.put_u32_le(TRANSACTION_HEADER_LEN);
    buf.put_u16_le(TRANSACTION_HEADER_TYPE);
    buf.put_u64_le(transaction_descriptor);
    // Outstanding request count.
    buf.put_u32_le(1);
    write_utf16_string(&mut buf, sql);
    buf
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[test]
    fn test_sql_batch_layout() {
        let buf = encode_sql_batch("go", 7);
        assert_eq!(buf.len(), 22 + 4);
        assert_eq!(&buf[..4], &22u32.to_le_bytes());
        assert_eq!(&buf[8..10], &[0x02, 0x00]);
        assert_eq!(&buf[10..18], &7u64.to_le_bytes());
        assert_eq!(&buf[22..], &[b'g', 0, b'o', 0]);
    }

    #[tokio::test]
    async fn test_new_session_is_tcp_connected() {
        let (client, _server) = duplex(64);
        let session = ProtocolSession::new(client, Config::new()).unwrap();
        assert_eq!(session.state(), LoginState::TcpConnected);
        assert_eq!(session.packet_size(), 4096);
        assert!(!session.is_encrypted());
        assert!(!session.is_poisoned());
    }

    #[tokio::test]
    async fn test_dropped_read_poisons() {
        let (client, _server) = duplex(64);
        let mut session = ProtocolSession::new(client, Config::new()).unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(20), session.next_token()).await;
        assert!(pending.is_err());
        assert!(session.is_poisoned());
        assert!(matches!(
            session.pump(PumpMode::Once).await,
            Err(Error::Poisoned)
        ));
    }

    #[tokio::test]
    async fn test_execute_over_scripted_io() {
        let payload = encode_sql_batch("go", 0);
        let mut request = vec![0x01, 0x01, 0x00, (8 + payload.len()) as u8, 0, 0, 1, 0];
        request.extend_from_slice(&payload);

        let mut response = vec![0x04, 0x01, 0x00, 0x15, 0x00, 0x00, 0x01, 0x00];
        response.extend_from_slice(&[0xFD, 0x10, 0x00, 0xC1, 0x00]);
        response.extend_from_slice(&2u64.to_le_bytes());

        let io = tokio_test::io::Builder::new()
            .write(&request)
            .read(&response)
            .build();
        let mut session = ProtocolSession::new(io, Config::new()).unwrap();
        let tokens = session.execute("go").await.unwrap();
        assert!(matches!(&tokens[..], [Token::Done(done)] if done.row_count == 2));
        assert!(!session.is_poisoned());
    }

    #[tokio::test]
    async fn test_closed_connection_is_terminal() {
        let (client, server) = duplex(64);
        drop(server);
        let mut session = ProtocolSession::new(client, Config::new()).unwrap();
        let err = session.next_token().await.unwrap_err();
        assert!(err.is_connection_closed());
        assert!(matches!(session.next_token().await, Err(Error::Poisoned)));
    }
}
