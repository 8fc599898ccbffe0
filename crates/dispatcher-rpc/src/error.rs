//! Error types for the dispatcher client.
//!
//! [`ClientError`] is returned directly to callers. Faults that have no
//! caller to return to (malformed frames, spurious responses, timeouts) are
//! delivered on the notification stream as an [`ErrorReport`].

use std::time::Duration;

use serde_json::Value;

use crate::id::Cookie;
use crate::protocol::RpcException;
use crate::transport::TransportError;

/// Errors returned by client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Rpc(#[from] RpcException),

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("No previous subscription for {0}")]
    NoSuchSubscription(String),

    #[error("There are no handlers registered for {0}")]
    NoHandlersForName(String),

    #[error("No handler registered for cookie {cookie} under {name}")]
    NoSuchCookie { name: String, cookie: Cookie },
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Kinds of asynchronous faults reported on the notification stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An inbound frame could not be decoded
    InvalidResponse,
    /// The transport did not open in time
    ConnectionTimeout,
    /// The transport failed while reading
    ConnectionClosed,
    /// A call received no response before its deadline
    RpcCallTimeout,
    /// A login call was rejected by the server
    RpcCallError,
    /// A response matched no pending call, or the server tried to call us
    SpuriousResponse,
    /// The server ended the session
    SessionLoggedOut,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidResponse => "invalid response",
            ErrorKind::ConnectionTimeout => "connection timeout",
            ErrorKind::ConnectionClosed => "connection closed",
            ErrorKind::RpcCallTimeout => "rpc call timeout",
            ErrorKind::RpcCallError => "rpc call error",
            ErrorKind::SpuriousResponse => "spurious response",
            ErrorKind::SessionLoggedOut => "session logged out",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// An asynchronous fault with its diagnostic details
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// Method of the call involved, for timeouts
    pub method: Option<String>,
    /// Arguments of the call involved, for timeouts
    pub args: Option<Vec<Value>>,
}

impl ErrorReport {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            method: None,
            args: None,
        }
    }

    #[must_use]
    pub fn with_call(mut self, method: impl Into<String>, args: Vec<Value>) -> Self {
        self.method = Some(method.into());
        self.args = Some(args);
        self
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(method) = &self.method {
            write!(f, " (method {method})")?;
        }
        Ok(())
    }
}
