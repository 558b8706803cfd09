//! Error types for every layer of the receiver.
//!
//! Only [`ConfigError`] and [`SessionError`] ever reach `main`; everything
//! raised while handling a single message is absorbed and logged where it
//! happens.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed command line. Reported before logging is set up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("expected 4 positional arguments (APP_ID LOGIN_HOST MESSAGING_HOST APP_PASSWORD), got {0}")]
    WrongArgumentCount(usize),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("invalid application id '{0}': must not contain '@', '/', '\\' or whitespace")]
    InvalidAppId(String),

    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("option '{0}' requires a value")]
    MissingValue(&'static str),
}

/// Failures reported by an [`crate::session::XmppTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out {0}")]
    Timeout(&'static str),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication rejected by server: {0}")]
    AuthRejected(String),

    #[error("connection closed by server")]
    Closed,
}

/// Errors that end a session attempt.
///
/// `Unreachable`, `AuthenticationRejected` and `InvalidState` are fatal and
/// terminate the process; the supervisor never retries them.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not connect to XMPP server at {server}: {source}")]
    Unreachable {
        server: String,
        #[source]
        source: TransportError,
    },

    #[error("could not authenticate as {user} to XMPP server at {server}: {source}")]
    AuthenticationRejected {
        user: String,
        server: String,
        #[source]
        source: TransportError,
    },

    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::model::SessionState,
    },

    #[error("connection lost: {0}")]
    Lost(#[source] TransportError),
}

impl SessionError {
    /// Whether this error must terminate the process instead of triggering a reconnect.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Lost(_))
    }
}

/// The backend port for an application could not be determined.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("could not read port file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("port file {} does not contain a valid port: {contents:?}", path.display())]
    Invalid { path: PathBuf, contents: String },
}

/// A single message could not be delivered to the backend.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}
