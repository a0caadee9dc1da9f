//! The blocking driver over a real TCP socket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::TcpListener;
use std::thread;

use mssql_auth::SqlCredentials;
use mssql_session::{BlockingSession, Config, LoginState, Token};
use mssql_testing::{MockServer, ResponseBuilder, ServerOptions, read_batch, write_message};
use tds_protocol::{EncryptionLevel, PacketType};

/// Serve one connection on a private runtime: login, then one batch.
fn serve(listener: TcpListener) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let (stream, _) = listener.accept().unwrap();
            stream.set_nonblocking(true).unwrap();
            let stream = tokio::net::TcpStream::from_std(stream).unwrap();

            let mut login = MockServer::new(ServerOptions::default())
                .accept_login(stream)
                .await
                .unwrap();
            let sql = read_batch(&mut login.stream).await.unwrap();
            let response = ResponseBuilder::new().done(42).build();
            write_message(&mut login.stream, PacketType::TabularResult, &response, 4096)
                .await
                .unwrap();
            sql
        })
    })
}

#[test]
fn test_blocking_login_and_batch() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = serve(listener);

    let config = Config::new()
        .host("127.0.0.1")
        .port(port)
        .encryption(EncryptionLevel::NotSupported);
    let mut session = BlockingSession::connect(config).unwrap();
    session
        .login(&SqlCredentials::new("sa", "Password123"))
        .unwrap();
    assert_eq!(session.state(), LoginState::LoginAcknowledged);
    assert_eq!(session.metadata().database.as_deref(), Some("master"));

    let tokens = session.execute("DELETE FROM t").unwrap();
    assert!(matches!(&tokens[..], [Token::Done(done)] if done.row_count == 42));
    assert_eq!(session.packet_data_left(), 0);

    assert_eq!(server.join().unwrap(), "DELETE FROM t");
}
