//! End-to-end sessions against the scripted server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use mssql_auth::SqlCredentials;
use mssql_session::{Config, Error, LoginEvent, LoginState, ProtocolSession, PumpMode, Token};
use mssql_testing::{
    LoginExchange, MockColumn, MockServer, MockServerError, ResponseBuilder, ScalarValue,
    ServerOptions, TestCertificate, read_batch, read_message, write_message,
};
use mssql_tls::TlsConfig;
use tds_protocol::{ColumnValue, EncryptionLevel, EnvChangeType, NegotiatedEncryption, PacketType};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

type ServerTask = JoinHandle<Result<LoginExchange, MockServerError>>;

fn credentials() -> SqlCredentials {
    SqlCredentials::new("sa", "Password123")
}

fn plain_config() -> Config {
    Config::new().encryption(EncryptionLevel::NotSupported)
}

/// Spawn the server side and return the client end of the pipe.
fn start<F, Fut>(options: ServerOptions, script: F) -> (DuplexStream, ServerTask)
where
    F: FnOnce(LoginExchange) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<LoginExchange, MockServerError>> + Send,
{
    let (client, server) = tokio::io::duplex(64 * 1024);
    let mock = MockServer::new(options);
    let task = tokio::spawn(async move {
        let login = mock.accept_login(server).await?;
        script(login).await
    });
    (client, task)
}

async fn respond(login: &mut LoginExchange, payload: &[u8]) -> Result<(), MockServerError> {
    write_message(&mut login.stream, PacketType::TabularResult, payload, 4096).await
}

#[tokio::test]
async fn test_plain_login() {
    let (client, server) = start(ServerOptions::default(), |login| async { Ok(login) });

    let mut session = ProtocolSession::new(client, plain_config()).unwrap();
    session.login(&credentials()).await.unwrap();

    assert_eq!(session.state(), LoginState::LoginAcknowledged);
    assert!(session.is_authenticated());
    assert!(!session.is_encrypted());
    assert!(!session.is_mars_enabled());
    assert_eq!(
        session.flow().transcript(),
        &[
            LoginEvent::Entered(LoginState::Disconnected),
            LoginEvent::Entered(LoginState::TcpConnected),
            LoginEvent::Entered(LoginState::PreloginSent),
            LoginEvent::Entered(LoginState::PreloginReceived),
            LoginEvent::Entered(LoginState::LoginSent),
            LoginEvent::Entered(LoginState::LoginAcknowledged),
        ]
    );

    let metadata = session.metadata();
    assert_eq!(metadata.database.as_deref(), Some("master"));
    assert_eq!(metadata.default_encoding.unwrap().code_page, 1252);

    let infos = session.take_infos();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].number, 5701);
    assert!(
        session
            .take_env_changes()
            .iter()
            .any(|change| change.kind() == EnvChangeType::PacketSize)
    );

    let exchange = server.await.unwrap().unwrap();
    assert_eq!(exchange.encryption, NegotiatedEncryption::None);
    assert_eq!(exchange.prelogin.encryption, EncryptionLevel::NotSupported);
    assert!(exchange.prelogin.fed_auth_required);
}

#[tokio::test]
async fn test_login_only_tls_reverts_to_plain() {
    let cert = TestCertificate::generate().unwrap();
    let options = ServerOptions::default()
        .with_encryption(EncryptionLevel::Off)
        .with_certificate(cert.clone());
    let (client, server) = start(options, |mut login| async move {
        assert_eq!(read_batch(&mut login.stream).await?, "SELECT 1");
        let response = ResponseBuilder::new()
            .colmetadata(&[MockColumn::int("")])
            .row(&[ScalarValue::Int(1)])
            .done(1)
            .build();
        respond(&mut login, &response).await?;
        Ok(login)
    });

    let config = Config::new()
        .encryption(EncryptionLevel::Off)
        .tls(TlsConfig::new().add_root_certificate(cert.certificate().clone()));
    let mut session = ProtocolSession::new(client, config).unwrap();
    session.login(&credentials()).await.unwrap();

    assert!(!session.is_encrypted());
    assert!(session.flow().is_tls_disabled());
    assert_eq!(
        session.flow().encryption(),
        Some(NegotiatedEncryption::LoginOnly)
    );
    assert_eq!(
        &session.flow().transcript()[3..],
        &[
            LoginEvent::Entered(LoginState::PreloginReceived),
            LoginEvent::Entered(LoginState::TlsHandshaking),
            LoginEvent::Entered(LoginState::TlsActive),
            LoginEvent::Entered(LoginState::LoginSent),
            LoginEvent::DisableTls,
            LoginEvent::Entered(LoginState::LoginAcknowledged),
        ]
    );

    // Post-login traffic runs in clear on the same stream.
    let tokens = session.execute("SELECT 1").await.unwrap();
    assert!(matches!(&tokens[1], Token::Row(values) if values[..] == [ColumnValue::Int(1)]));

    let exchange = server.await.unwrap().unwrap();
    assert_eq!(exchange.encryption, NegotiatedEncryption::LoginOnly);
}

#[tokio::test]
async fn test_full_tls_session() {
    let cert = TestCertificate::generate().unwrap();
    let options = ServerOptions::default()
        .with_encryption(EncryptionLevel::On)
        .with_certificate(cert.clone());
    let (client, server) = start(options, |mut login| async move {
        read_batch(&mut login.stream).await?;
        respond(&mut login, &ResponseBuilder::new().done(0).build()).await?;
        Ok(login)
    });

    let config = Config::new()
        .encryption(EncryptionLevel::On)
        .trust_server_certificate(true);
    let mut session = ProtocolSession::new(client, config).unwrap();
    session.login(&credentials()).await.unwrap();

    assert!(session.is_encrypted());
    assert!(!session.flow().is_tls_disabled());
    assert!(
        !session
            .flow()
            .transcript()
            .contains(&LoginEvent::DisableTls)
    );

    let tokens = session.execute("SELECT 1").await.unwrap();
    assert!(matches!(&tokens[..], [Token::Done(_)]));
    assert_eq!(
        server.await.unwrap().unwrap().encryption,
        NegotiatedEncryption::Full
    );
}

#[tokio::test]
async fn test_client_requires_encryption_server_cannot() {
    let (client, _server) = start(ServerOptions::default(), |login| async { Ok(login) });

    let config = Config::new().encryption(EncryptionLevel::Required);
    let mut session = ProtocolSession::new(client, config).unwrap();
    let err = session.login(&credentials()).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Protocol(tds_protocol::ProtocolError::EncryptionNotSupported)
    ));
    assert_eq!(session.state(), LoginState::PreloginReceived);
    assert!(session.is_poisoned());
}

#[tokio::test]
async fn test_mars_and_feature_acks() {
    let options = ServerOptions::default()
        .with_mars(true)
        .with_feature(0x04, [1u8])
        .with_feature(0x0A, [1u8]);
    let (client, _server) = start(options, |login| async { Ok(login) });

    let mut session = ProtocolSession::new(client, plain_config()).unwrap();
    session.login(&credentials()).await.unwrap();

    assert!(session.is_mars_enabled());
    assert!(session.metadata().is_column_encryption_enabled());
    assert!(
        session
            .metadata()
            .is_feature_enabled(tds_protocol::FeatureId::Utf8Support)
    );
}

#[tokio::test]
async fn test_login_rejected() {
    let options = ServerOptions::default().rejecting_login();
    let (client, _server) = start(options, |login| async { Ok(login) });

    let mut session = ProtocolSession::new(client, plain_config()).unwrap();
    let err = session.login(&credentials()).await.unwrap_err();

    assert!(err.is_server_error(18456));
    assert_eq!(err.class(), Some(14));
    assert!(!session.is_authenticated());
    assert_eq!(session.state(), LoginState::LoginSent);
}

#[tokio::test]
async fn test_result_set_spanning_packets() {
    let (client, _server) = start(ServerOptions::default(), |mut login| async move {
        read_batch(&mut login.stream).await?;
        let mut response = ResponseBuilder::new()
            .colmetadata(&[MockColumn::int("id"), MockColumn::nvarchar("name", 100)]);
        for i in 0..50 {
            response = response.row(&[ScalarValue::Int(i), ScalarValue::String(format!("row-{i}"))]);
        }
        let response = response
            .nbc_row(&[ScalarValue::Int(50), ScalarValue::Null])
            .done(51)
            .build();
        // Small packets so tokens straddle packet boundaries.
        write_message(&mut login.stream, PacketType::TabularResult, &response, 512).await?;
        Ok(login)
    });

    let mut session = ProtocolSession::new(client, plain_config()).unwrap();
    session.login(&credentials()).await.unwrap();
    let tokens = session.execute("SELECT id, name FROM t").await.unwrap();

    let Token::ColMetaData(Some(columns)) = &tokens[0] else {
        panic!("expected column metadata, got {:?}", tokens[0]);
    };
    assert_eq!(columns.len(), 2);
    assert_eq!(columns.columns[1].name, "name");

    let rows: Vec<&Vec<ColumnValue>> = tokens
        .iter()
        .filter_map(|t| match t {
            Token::Row(values) => Some(values),
            _ => None,
        })
        .collect();
    assert_eq!(rows.len(), 51);
    assert_eq!(
        rows[7][..],
        [ColumnValue::Int(7), ColumnValue::String("row-7".into())]
    );
    assert_eq!(rows[50][..], [ColumnValue::Int(50), ColumnValue::Null]);
    assert!(matches!(tokens.last(), Some(Token::Done(done)) if done.row_count == 51));
    assert_eq!(session.packet_data_left(), 0);
}

#[tokio::test]
async fn test_server_error_keeps_session_usable() {
    let (client, _server) = start(ServerOptions::default(), |mut login| async move {
        read_batch(&mut login.stream).await?;
        let failed = ResponseBuilder::new()
            .error(208, 16, "Invalid object name 'nope'.")
            .done(0)
            .build();
        respond(&mut login, &failed).await?;

        read_batch(&mut login.stream).await?;
        respond(&mut login, &ResponseBuilder::new().done(3).build()).await?;
        Ok(login)
    });

    let mut session = ProtocolSession::new(client, plain_config()).unwrap();
    session.login(&credentials()).await.unwrap();

    let err = session.execute("SELECT * FROM nope").await.unwrap_err();
    assert!(err.is_server_error(208));
    assert!(!err.is_terminal());
    assert!(!session.is_poisoned());

    let tokens = session.execute("UPDATE t SET x = 1").await.unwrap();
    assert!(matches!(&tokens[..], [Token::Done(done)] if done.row_count == 3));
}

#[tokio::test]
async fn test_pump_once_reads_single_tokens() {
    let (client, _server) = start(ServerOptions::default(), |mut login| async move {
        read_batch(&mut login.stream).await?;
        let response = ResponseBuilder::new()
            .info(50000, "step")
            .return_status(0)
            .done(0)
            .build();
        respond(&mut login, &response).await?;
        Ok(login)
    });

    let mut session = ProtocolSession::new(client, plain_config()).unwrap();
    session.login(&credentials()).await.unwrap();
    session.take_infos();
    session.send_sql_batch("EXEC p").await.unwrap();

    let first = session.pump(PumpMode::Once).await.unwrap();
    assert!(matches!(&first[..], [Token::Info(info)] if info.message == "step"));
    assert!(session.packet_data_left() > 0);
    assert!(matches!(
        session.next_token().await.unwrap(),
        Token::ReturnStatus(0)
    ));
    assert!(matches!(session.next_token().await.unwrap(), Token::Done(_)));
    assert_eq!(session.packet_data_left(), 0);
    assert_eq!(session.take_infos().len(), 1);
}

#[tokio::test]
async fn test_transaction_descriptor_sent_with_batches() {
    let (client, server) = start(ServerOptions::default(), |mut login| async move {
        read_batch(&mut login.stream).await?;
        let begin = ResponseBuilder::new()
            .transaction(EnvChangeType::BeginTransaction, 0x0102_0304_0506_0708)
            .done(0)
            .build();
        respond(&mut login, &begin).await?;

        let batch = read_message(&mut login.stream).await?;
        assert_eq!(
            batch.payload[10..18],
            0x0102_0304_0506_0708u64.to_le_bytes()
        );
        let commit = ResponseBuilder::new()
            .transaction(EnvChangeType::CommitTransaction, 0x0102_0304_0506_0708)
            .done(0)
            .build();
        respond(&mut login, &commit).await?;
        Ok(login)
    });

    let mut session = ProtocolSession::new(client, plain_config()).unwrap();
    session.login(&credentials()).await.unwrap();

    session.execute("BEGIN TRAN").await.unwrap();
    assert_eq!(session.metadata().transaction_descriptor, 0x0102_0304_0506_0708);
    session.execute("COMMIT").await.unwrap();
    assert_eq!(session.metadata().transaction_descriptor, 0);

    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_hangup_poisons_session() {
    let (client, _server) = start(ServerOptions::default(), |mut login| async move {
        read_batch(&mut login.stream).await?;
        // Half a DONE token, then close.
        respond(&mut login, &[0xFD, 0x00]).await?;
        drop(login.stream);
        Err(MockServerError::Protocol("closed".into()))
    });

    let mut session = ProtocolSession::new(client, plain_config()).unwrap();
    session.login(&credentials()).await.unwrap();

    let err = session.execute("SELECT 1").await.unwrap_err();
    assert!(err.is_terminal());
    assert!(session.is_poisoned());
    assert!(matches!(
        session.execute("SELECT 1").await,
        Err(Error::Poisoned)
    ));
}
