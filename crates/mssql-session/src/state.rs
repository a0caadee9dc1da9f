//! Login state machine.
//!
//! ```text
//! Disconnected -> TcpConnected -> PreloginSent -> PreloginReceived
//!     -> [TlsHandshaking -> TlsActive] -> LoginSent -> LoginAcknowledged
//! ```
//!
//! The bracketed TLS states are entered exactly when the negotiated
//! encryption needs a handshake, and skipped exactly when it does not. With
//! login-only encryption the TLS layer is dropped once LOGIN7 is on the wire;
//! that is recorded as [`LoginEvent::DisableTls`].

use tds_protocol::NegotiatedEncryption;

use crate::error::{Error, Result};

/// Position in the login sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginState {
    /// No transport.
    Disconnected,
    /// Transport established.
    TcpConnected,
    /// PRELOGIN request sent.
    PreloginSent,
    /// PRELOGIN response parsed and encryption negotiated.
    PreloginReceived,
    /// TLS handshake running inside PRELOGIN packets.
    TlsHandshaking,
    /// TLS session established.
    TlsActive,
    /// LOGIN7 sent.
    LoginSent,
    /// LOGINACK received.
    LoginAcknowledged,
}

/// One entry of the login transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginEvent {
    /// The flow entered a state.
    Entered(LoginState),
    /// The transport reverted from TLS to plain TCP.
    DisableTls,
}

/// Validates and records the login sequence.
#[derive(Debug, Clone)]
pub struct LoginFlow {
    state: LoginState,
    encryption: Option<NegotiatedEncryption>,
    tls_disabled: bool,
    transcript: Vec<LoginEvent>,
}

impl Default for LoginFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginFlow {
    /// A flow in [`LoginState::Disconnected`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LoginState::Disconnected,
            encryption: None,
            tls_disabled: false,
            transcript: vec![LoginEvent::Entered(LoginState::Disconnected)],
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LoginState {
        self.state
    }

    /// Negotiated encryption, once PRELOGIN has been answered.
    #[must_use]
    pub fn encryption(&self) -> Option<NegotiatedEncryption> {
        self.encryption
    }

    /// Every state entered and every TLS reversion, in order.
    #[must_use]
    pub fn transcript(&self) -> &[LoginEvent] {
        &self.transcript
    }

    /// Whether login has completed.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state == LoginState::LoginAcknowledged
    }

    /// Whether the TLS layer has been dropped after login.
    #[must_use]
    pub fn is_tls_disabled(&self) -> bool {
        self.tls_disabled
    }

    /// Record the outcome of encryption negotiation.
    ///
    /// Only valid in [`LoginState::PreloginReceived`], and only once.
    pub fn negotiated(&mut self, encryption: NegotiatedEncryption) -> Result<()> {
        if self.state != LoginState::PreloginReceived || self.encryption.is_some() {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: LoginState::PreloginReceived,
            });
        }
        tracing::debug!(?encryption, "encryption negotiated");
        self.encryption = Some(encryption);
        Ok(())
    }

    /// Move to `to`, rejecting any skipped or out-of-order step.
    pub fn advance(&mut self, to: LoginState) -> Result<()> {
        use LoginState::{
            Disconnected, LoginAcknowledged, LoginSent, PreloginReceived, PreloginSent,
            TcpConnected, TlsActive, TlsHandshaking,
        };

        let handshake = self.encryption.map(|e| e.needs_handshake());
        let allowed = match (self.state, to) {
            (Disconnected, TcpConnected)
            | (TcpConnected, PreloginSent)
            | (PreloginSent, PreloginReceived)
            | (TlsHandshaking, TlsActive)
            | (TlsActive, LoginSent)
            | (LoginSent, LoginAcknowledged) => true,
            (PreloginReceived, TlsHandshaking) => handshake == Some(true),
            (PreloginReceived, LoginSent) => handshake == Some(false),
            _ => false,
        };
        if !allowed {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }

        tracing::debug!(from = ?self.state, ?to, "login state transition");
        self.state = to;
        self.transcript.push(LoginEvent::Entered(to));
        Ok(())
    }

    /// Record the reversion to plain TCP under login-only encryption.
    ///
    /// Valid once LOGIN7 has been sent, at most once per flow.
    pub fn disable_tls(&mut self) -> Result<()> {
        let sent = matches!(
            self.state,
            LoginState::LoginSent | LoginState::LoginAcknowledged
        );
        if !sent
            || self.tls_disabled
            || self.encryption != Some(NegotiatedEncryption::LoginOnly)
        {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: self.state,
            });
        }
        tracing::debug!("login-only encryption: TLS disabled");
        self.tls_disabled = true;
        self.transcript.push(LoginEvent::DisableTls);
        Ok(())
    }
}
