//! Authentication state machine.
//!
//! ```text
//! Start ─┬─ CleartextPassword ──────────────────────────────┐
//!        ├─ MD5Password ─────────────────────────────────────┤
//!        ├─ SASL ── SASLContinue ── SASLFinal ───────────────┤
//!        └───────────────────────────────────────────── AuthenticationOk
//! ```
//!
//! [`Authenticator::step`] consumes one `Authentication*` request and returns
//! the reply to send, if any. It performs no I/O. An `ErrorResponse` is handled
//! by the session and ends the exchange from any state.

use bytes::Bytes;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::backend::AuthRequest;
use crate::protocol::frontend::FrontendMessage;
use crate::protocol::scram::{self, ScramPipeline};

/// Channel binding policy for SCRAM.
///
/// Channel binding is not implemented, so `Require` fails before any
/// credentials are exchanged and `Prefer` behaves like `Disable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelBinding {
    Disable,
    #[default]
    Prefer,
    Require,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Start,
    Cleartext,
    Md5,
    SaslNegotiating,
    SaslContinue,
    SaslFinal,
    Authenticated,
}

/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(user.as_bytes());
    let inner = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{:x}", hasher.finalize())
}

/// Client side of the startup authentication exchange.
#[derive(Debug)]
pub struct Authenticator {
    user: String,
    password: Option<String>,
    channel_binding: ChannelBinding,
    state: AuthState,
    scram: Option<ScramPipeline>,
}

impl Authenticator {
    pub fn new(user: &str, password: Option<&str>, channel_binding: ChannelBinding) -> Result<Self> {
        if channel_binding == ChannelBinding::Require {
            return Err(ProtocolError::Authentication(constants::ERR_CHANNEL_BINDING.into()));
        }
        Ok(Self {
            user: user.to_string(),
            password: password.map(str::to_string),
            channel_binding,
            state: AuthState::Start,
            scram: None,
        })
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    fn password(&self) -> Result<&str> {
        self.password
            .as_deref()
            .ok_or_else(|| ProtocolError::Authentication(constants::ERR_PASSWORD_REQUIRED.into()))
    }

    fn unexpected(&self, request: &AuthRequest) -> ProtocolError {
        ProtocolError::Authentication(format!(
            "unexpected authentication request {request:?} in state {:?}",
            self.state
        ))
    }

    /// Advance on one server request; returns the reply to send.
    pub fn step(&mut self, request: AuthRequest) -> Result<Option<FrontendMessage>> {
        debug!(state = ?self.state, request = ?request, "Authentication step");
        match (self.state, request) {
            (AuthState::Start | AuthState::Cleartext | AuthState::Md5, AuthRequest::Ok)
            | (AuthState::SaslFinal, AuthRequest::Ok) => {
                self.state = AuthState::Authenticated;
                self.scram = None;
                Ok(None)
            }
            (AuthState::Start, AuthRequest::CleartextPassword) => {
                let password = self.password()?.as_bytes().to_vec();
                self.state = AuthState::Cleartext;
                Ok(Some(FrontendMessage::Password { password }))
            }
            (AuthState::Start, AuthRequest::Md5Password { salt }) => {
                let hashed = md5_password(&self.user, self.password()?, salt);
                self.state = AuthState::Md5;
                Ok(Some(FrontendMessage::Password {
                    password: hashed.into_bytes(),
                }))
            }
            (AuthState::Start, AuthRequest::Sasl { mechanisms }) => {
                if !mechanisms.iter().any(|m| m == scram::MECHANISM) {
                    let msg = if mechanisms.iter().any(|m| m == scram::MECHANISM_PLUS) {
                        constants::ERR_CHANNEL_BINDING
                    } else {
                        constants::ERR_NO_SCRAM_MECHANISM
                    };
                    return Err(ProtocolError::Authentication(msg.into()));
                }
                debug!(channel_binding = ?self.channel_binding, "Using SCRAM-SHA-256 without channel binding");
                let mut pipeline = ScramPipeline::new(&self.user, self.password()?);
                let data = pipeline.client_first()?;
                self.scram = Some(pipeline);
                self.state = AuthState::SaslNegotiating;
                Ok(Some(FrontendMessage::SaslInitialResponse {
                    mechanism: scram::MECHANISM.to_string(),
                    data: Bytes::from(data),
                }))
            }
            (AuthState::SaslNegotiating, AuthRequest::SaslContinue { data }) => {
                let pipeline = self
                    .scram
                    .as_mut()
                    .ok_or_else(|| ProtocolError::Authentication(constants::ERR_SCRAM_STATE.into()))?;
                let reply = pipeline.handle_server_first(&data)?;
                self.state = AuthState::SaslContinue;
                Ok(Some(FrontendMessage::SaslResponse {
                    data: Bytes::from(reply),
                }))
            }
            (AuthState::SaslContinue, AuthRequest::SaslFinal { data }) => {
                let pipeline = self
                    .scram
                    .as_mut()
                    .ok_or_else(|| ProtocolError::Authentication(constants::ERR_SCRAM_STATE.into()))?;
                pipeline.verify_server_final(&data)?;
                self.state = AuthState::SaslFinal;
                Ok(None)
            }
            (_, AuthRequest::Unsupported { code }) => Err(ProtocolError::Authentication(format!(
                "unsupported authentication method (code {code})"
            ))),
            (_, request) => Err(self.unexpected(&request)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn md5_reference_hash() {
        assert_eq!(
            md5_password("ivan", "secret", [1, 2, 3, 4]),
            "md5419f83fa27754d5f923aaddbaa6b6946"
        );
    }

    #[test]
    fn trust_authentication() {
        let mut auth = Authenticator::new("u", None, ChannelBinding::Prefer).unwrap();
        assert_eq!(auth.step(AuthRequest::Ok).unwrap(), None);
        assert!(auth.is_authenticated());
    }

    #[test]
    fn cleartext_needs_password() {
        let mut auth = Authenticator::new("u", None, ChannelBinding::Prefer).unwrap();
        assert!(auth.step(AuthRequest::CleartextPassword).is_err());

        let mut auth = Authenticator::new("u", Some("pw"), ChannelBinding::Prefer).unwrap();
        assert_eq!(
            auth.step(AuthRequest::CleartextPassword).unwrap(),
            Some(FrontendMessage::Password {
                password: b"pw".to_vec()
            })
        );
        assert_eq!(auth.state(), AuthState::Cleartext);
    }

    #[test]
    fn channel_binding_require_fails_fast() {
        let err = Authenticator::new("u", Some("pw"), ChannelBinding::Require).unwrap_err();
        assert!(err.to_string().contains(constants::ERR_CHANNEL_BINDING));
    }

    #[test]
    fn plus_only_server_is_rejected() {
        let mut auth = Authenticator::new("u", Some("pw"), ChannelBinding::Prefer).unwrap();
        let err = auth
            .step(AuthRequest::Sasl {
                mechanisms: vec![scram::MECHANISM_PLUS.into()],
            })
            .unwrap_err();
        assert!(err.to_string().contains(constants::ERR_CHANNEL_BINDING));
    }

    #[test]
    fn sasl_cannot_skip_server_verification() {
        let mut auth = Authenticator::new("u", Some("pw"), ChannelBinding::Disable).unwrap();
        let first = auth
            .step(AuthRequest::Sasl {
                mechanisms: vec![scram::MECHANISM.into()],
            })
            .unwrap();
        assert!(matches!(first, Some(FrontendMessage::SaslInitialResponse { .. })));
        assert!(auth.step(AuthRequest::Ok).is_err());
        assert!(!auth.is_authenticated());
    }
}
