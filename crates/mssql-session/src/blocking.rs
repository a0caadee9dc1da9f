//! Blocking driver over the async session.
//!
//! The protocol logic lives in [`ProtocolSession`] only. This driver wraps a
//! std stream in [`BlockingIo`] and runs each operation to completion on a
//! private current-thread runtime, so every transport call blocks in place.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use mssql_auth::CredentialProvider;
use mssql_codec::BlockingIo;
use tds_protocol::{EnvChange, ServerMessage};
use tokio::runtime::{Builder, Runtime};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::metadata::ProtocolMetadata;
use crate::session::{ProtocolSession, PumpMode};
use crate::state::{LoginFlow, LoginState};
use crate::token_reader::Token;

/// A [`ProtocolSession`] driven synchronously.
#[derive(Debug)]
pub struct BlockingSession<S> {
    inner: ProtocolSession<BlockingIo<S>>,
    runtime: Runtime,
}

impl BlockingSession<TcpStream> {
    /// Connect to the configured host, trying each resolved address within
    /// [`Config::connect_timeout`].
    pub fn connect(config: Config) -> Result<Self> {
        let mut last_error = None;
        for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    tracing::debug!(%addr, "TCP connected");
                    return Self::new(stream, config);
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "TCP connect failed");
                    last_error = Some(e);
                }
            }
        }
        Err(Error::Io(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        })))
    }
}

impl<S> BlockingSession<S> {
    /// Current login state.
    #[must_use]
    pub fn state(&self) -> LoginState {
        self.inner.state()
    }

    /// The login state machine and its transcript.
    #[must_use]
    pub fn flow(&self) -> &LoginFlow {
        self.inner.flow()
    }

    /// Whether the server enabled MARS in PRELOGIN.
    #[must_use]
    pub fn is_mars_enabled(&self) -> bool {
        self.inner.is_mars_enabled()
    }

    /// Session metadata learned from the server.
    #[must_use]
    pub fn metadata(&self) -> &ProtocolMetadata {
        self.inner.metadata()
    }

    /// Payload bytes left in the current incoming packet.
    #[must_use]
    pub fn packet_data_left(&self) -> usize {
        self.inner.packet_data_left()
    }

    /// Environment changes received since the last call.
    pub fn take_env_changes(&mut self) -> Vec<EnvChange> {
        self.inner.take_env_changes()
    }

    /// INFO messages received since the last call.
    pub fn take_infos(&mut self) -> Vec<ServerMessage> {
        self.inner.take_infos()
    }

    /// Recover the raw stream, if it is still reachable.
    pub fn into_inner(self) -> Option<S> {
        self.inner.into_inner().map(BlockingIo::into_inner)
    }
}

impl<S: Read + Write + Unpin> BlockingSession<S> {
    /// Wrap an established blocking stream.
    pub fn new(stream: S, config: Config) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        Ok(Self {
            inner: ProtocolSession::new(BlockingIo::new(stream), config)?,
            runtime,
        })
    }

    /// See [`ProtocolSession::login`].
    pub fn login(&mut self, credentials: &dyn CredentialProvider) -> Result<()> {
        self.runtime.block_on(self.inner.login(credentials))
    }

    /// See [`ProtocolSession::pump`].
    pub fn pump(&mut self, mode: PumpMode) -> Result<Vec<Token>> {
        self.runtime.block_on(self.inner.pump(mode))
    }

    /// See [`ProtocolSession::next_token`].
    pub fn next_token(&mut self) -> Result<Token> {
        self.runtime.block_on(self.inner.next_token())
    }

    /// See [`ProtocolSession::send_sql_batch`].
    pub fn send_sql_batch(&mut self, sql: &str) -> Result<()> {
        self.runtime.block_on(self.inner.send_sql_batch(sql))
    }

    /// See [`ProtocolSession::execute`].
    pub fn execute(&mut self, sql: &str) -> Result<Vec<Token>> {
        self.runtime.block_on(self.inner.execute(sql))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Replays canned server bytes and records what the client writes.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_batch_round_trip_blocking() {
        // One TABULAR_RESULT packet holding a single DONE token.
        let mut wire = vec![0x04, 0x01, 0x00, 0x15, 0x00, 0x00, 0x01, 0x00];
        wire.extend_from_slice(&[0xFD, 0x10, 0x00, 0xC1, 0x00]);
        wire.extend_from_slice(&5u64.to_le_bytes());

        let stream = Scripted {
            input: Cursor::new(wire),
            output: Vec::new(),
        };
        let mut session = BlockingSession::new(stream, Config::new()).unwrap();
        let tokens = session.execute("select 1").unwrap();
        assert!(matches!(&tokens[..], [Token::Done(done)] if done.row_count == 5));
        assert_eq!(session.packet_data_left(), 0);

        let written = session.into_inner().unwrap().output;
        assert_eq!(written[0], 0x01);
        assert_eq!(written[1], 0x01);
        assert_eq!(written.len(), 8 + 22 + 16);
    }

    #[test]
    fn test_eof_is_connection_closed() {
        let stream = Scripted {
            input: Cursor::new(Vec::new()),
            output: Vec::new(),
        };
        let mut session = BlockingSession::new(stream, Config::new()).unwrap();
        let err = session.next_token().unwrap_err();
        assert!(err.is_connection_closed());
        assert!(matches!(session.next_token(), Err(Error::Poisoned)));
    }
}
