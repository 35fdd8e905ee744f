//! # Error Types
//!
//! Error handling for the PostgreSQL protocol client.
//!
//! Every fallible operation in the crate returns [`Result`], whose error type
//! [`ProtocolError`] groups failures by how they affect the session.
//!
//! ## Error Categories
//! - **Transport**: socket I/O failures, mid-frame close, read timeout, TLS failure.
//!   Fatal, the session is unusable afterwards.
//! - **Protocol**: unknown or malformed frames, messages that are invalid for the
//!   current phase. Fatal.
//! - **Server**: an `ErrorResponse` received while running a query. The session
//!   stays usable.
//! - **Authentication**: startup rejected by the server or SCRAM verification failure.
//!   Fatal to the connection attempt.
//! - **Codec**: a single value could not be converted. Reported after the
//!   interaction has drained to `ReadyForQuery`.
//!
//! ## Example Usage
//! ```rust
//! use pgwire_client::error::{ProtocolError, Result};
//!
//! fn check_arity(expected: usize, actual: usize) -> Result<()> {
//!     if expected != actual {
//!         return Err(ProtocolError::ParameterCount { expected, actual });
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_arity(2, 3).is_err());
//! ```

use std::io;
use thiserror::Error;

use crate::protocol::fields::ServerError;
use crate::types::Oid;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_FRAME_TOO_SHORT: &str = "Frame length shorter than its own length field";
    pub const ERR_UNEXPECTED_EOF: &str = "Unexpected end of message body";
    pub const ERR_UNTERMINATED_STRING: &str = "Unterminated C-string in message body";
    pub const ERR_TRAILING_BYTES: &str = "Message body has trailing bytes";
    pub const ERR_COUNT_OVERFLOW: &str = "Count does not fit the protocol's 16-bit field";
    pub const ERR_LENGTH_OVERFLOW: &str = "Encoded size overflows the 32-bit length field";
    pub const ERR_NUL_IN_STRING: &str = "String contains an embedded NUL byte";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_SESSION_BROKEN: &str = "Session is broken after a fatal error";
    pub const ERR_TLS_REFUSED: &str = "Server refused SSL and sslmode=require";

    /// Authentication errors
    pub const ERR_PASSWORD_REQUIRED: &str = "Server requested a password but none is configured";
    pub const ERR_CHANNEL_BINDING: &str = "SCRAM channel binding is not supported";
    pub const ERR_NO_SCRAM_MECHANISM: &str = "Server offered no supported SASL mechanism";
    pub const ERR_SERVER_NONCE: &str = "Server nonce does not extend the client nonce";
    pub const ERR_SERVER_SIGNATURE: &str = "Server signature mismatch";
    pub const ERR_SCRAM_STATE: &str = "SCRAM message received out of order";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Read timed out")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unexpected message '{tag}' during {phase}")]
    UnexpectedMessage { tag: char, phase: &'static str },

    #[error("{0}")]
    Server(Box<ServerError>),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Startup rejected: {0}")]
    StartupRejected(Box<ServerError>),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Bind supplied {actual} parameters, statement declares {expected}")]
    ParameterCount { expected: usize, actual: usize },

    #[error("COPY aborted: {0}")]
    CopyAborted(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("{cause} (server also reported: {server})")]
    Interaction {
        #[source]
        cause: Box<ProtocolError>,
        server: Box<ServerError>,
    },

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether the error leaves the session unusable.
    pub fn is_fatal(&self) -> bool {
        match self {
            ProtocolError::Io(_)
            | ProtocolError::ConnectionClosed
            | ProtocolError::Timeout
            | ProtocolError::Protocol(_)
            | ProtocolError::UnexpectedMessage { .. }
            | ProtocolError::Authentication(_)
            | ProtocolError::StartupRejected(_)
            | ProtocolError::TlsError(_) => true,
            ProtocolError::Interaction { cause, .. } => cause.is_fatal(),
            _ => false,
        }
    }

    /// The server-reported error attached to this failure, if any.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            ProtocolError::Server(e) | ProtocolError::StartupRejected(e) => Some(e),
            ProtocolError::Interaction { server, .. } => Some(server),
            _ => None,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        ProtocolError::Protocol(msg.into())
    }
}

impl From<ServerError> for ProtocolError {
    fn from(err: ServerError) -> Self {
        ProtocolError::Server(Box::new(err))
    }
}

/// Failure converting one value to or from its wire representation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The processor for `oid` has no path for this representation.
    #[error("type {oid} does not support {capability} (value: {value})")]
    Unsupported {
        oid: Oid,
        capability: &'static str,
        value: String,
    },

    /// The host value variant cannot be encoded as `oid`.
    #[error("value {value} cannot be encoded as type {oid}")]
    WrongValue { oid: Oid, value: String },

    /// The wire data for `oid` is not well formed.
    #[error("malformed data for type {oid}: {reason} (value: {value})")]
    Malformed {
        oid: Oid,
        reason: String,
        value: String,
    },
}

impl CodecError {
    pub(crate) fn unsupported(oid: Oid, capability: &'static str, value: impl std::fmt::Debug) -> Self {
        CodecError::Unsupported {
            oid,
            capability,
            value: render(value),
        }
    }

    pub(crate) fn wrong_value(oid: Oid, value: impl std::fmt::Debug) -> Self {
        CodecError::WrongValue {
            oid,
            value: render(value),
        }
    }

    pub(crate) fn malformed(oid: Oid, reason: impl Into<String>, value: impl std::fmt::Debug) -> Self {
        CodecError::Malformed {
            oid,
            reason: reason.into(),
            value: render(value),
        }
    }

    /// OID the failure refers to.
    pub fn oid(&self) -> Oid {
        match self {
            CodecError::Unsupported { oid, .. }
            | CodecError::WrongValue { oid, .. }
            | CodecError::Malformed { oid, .. } => *oid,
        }
    }
}

// Long payloads are cut so error messages stay readable.
fn render(value: impl std::fmt::Debug) -> String {
    const MAX: usize = 96;
    let mut text = format!("{value:?}");
    if text.len() > MAX {
        let mut cut = MAX;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
