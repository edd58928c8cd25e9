use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no token provider configured")]
    NoProviderConfigured,
    #[error("token load failed: {0}")]
    TokenLoad(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("not connected")]
    NotConnected,
    #[error("call has ended")]
    CallEnded,
    #[error("a call is already in progress")]
    CallInProgress,
}

/// What went wrong on a socket, as reported by a transport or the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketErrorKind {
    Timeout,
    ConnectionReset,
    Dns,
    /// The peer closed the socket without being asked to.
    ConnectionClosed,
    /// 5xx-class server failure.
    Server,
    TokenExpired,
    TokenInvalid,
    ApiKeyNotFound,
    ProtocolMismatch,
    Validation,
    /// Credentials could not be obtained before connecting.
    TokenLoad,
    Unknown,
}

/// Error value carried by connection states and events.
///
/// Kept `Clone + PartialEq` so that states holding it stay comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketError {
    pub kind: SocketErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<i32>,
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        if let Some(code) = self.code {
            write!(f, " (code {code})")?;
        }
        Ok(())
    }
}

impl std::error::Error for SocketError {}

impl SocketError {
    pub fn new(kind: SocketErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SocketErrorKind::Timeout, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(SocketErrorKind::ConnectionClosed, message)
    }

    /// Wraps a credential loading failure.
    pub fn token_load(cause: &LinkError) -> Self {
        Self::new(SocketErrorKind::TokenLoad, cause.to_string())
    }

    /// Whether the server rejected the credentials in a way a fresh token can fix.
    pub fn is_auth(&self) -> bool {
        matches!(
            self.kind,
            SocketErrorKind::TokenExpired | SocketErrorKind::TokenInvalid
        )
    }
}

/// Result of classifying a [`SocketError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry; when `refresh_token` is set the cached token must be expired first.
    Recoverable { refresh_token: bool },
    Unrecoverable,
}

/// Classifies a transport or server error. Every failure goes through here once.
pub fn classify(error: &SocketError) -> ErrorClass {
    use SocketErrorKind::*;
    match error.kind {
        Timeout | ConnectionReset | Dns | ConnectionClosed | Server | Unknown => {
            ErrorClass::Recoverable {
                refresh_token: false,
            }
        }
        TokenExpired | TokenInvalid => ErrorClass::Recoverable {
            refresh_token: true,
        },
        ApiKeyNotFound | ProtocolMismatch | Validation | TokenLoad => ErrorClass::Unrecoverable,
    }
}
