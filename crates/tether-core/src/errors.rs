//! Error types shared across the channel, session and dispatch layers.

use serde_json::{json, Value};

/// Why a session left the connected state. Terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DisconnectReason {
    /// No transport slot arrived within the connect timeout.
    #[error("connect failed: no transport within the connect timeout")]
    ConnectFailed,
    /// The slot pool stayed empty for the no-transport timeout.
    #[error("connection lost: no transport within the no-transport timeout")]
    ConnectionLost,
    /// The server closed the session.
    #[error("connection closed")]
    Closed,
    /// The client sent a `close` action.
    #[error("closed by peer")]
    ClosedByPeer,
}

impl DisconnectReason {
    /// Short classification string for logging/metrics.
    pub const fn kind(self) -> &'static str {
        match self {
            Self::ConnectFailed => "connect_failed",
            Self::ConnectionLost => "connection_lost",
            Self::Closed => "closed",
            Self::ClosedByPeer => "closed_by_peer",
        }
    }
}

/// A call targeted an object or method that is not exposed. Non-fatal.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("no such method: {method}")]
pub struct NoSuchMethod {
    /// The method that was asked for.
    pub method: String,
}

impl NoSuchMethod {
    /// Failure for `method`.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
        }
    }
}

/// A failure raised by an application call handler, in the shape sent back to
/// the caller: an error class and a message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{class}: {message}")]
pub struct ApplicationError {
    /// Error class name, e.g. `ValueError`.
    pub class: String,
    /// Human-readable description.
    pub message: String,
}

impl ApplicationError {
    /// Error class used when the handler gave no more specific one.
    pub const GENERIC_CLASS: &'static str = "Error";

    /// Build an error with an explicit class.
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Build an error with the generic class.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Self::GENERIC_CLASS, message)
    }

    /// Error reported when a handler panicked.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new("Panic", message)
    }

    /// Encode as the `result` of a failed `respond`.
    pub fn to_wire(&self) -> Value {
        json!([self.class, self.message])
    }

    /// Decode the `result` of a failed `respond`. Anything that is not a
    /// `[class, message]` pair keeps its JSON text as the message.
    pub fn from_wire(result: &Value) -> Self {
        match result.as_array().map(Vec::as_slice) {
            Some([Value::String(class), Value::String(message)]) => Self::new(class, message),
            Some([Value::String(class), other]) => Self::new(class, other.to_string()),
            _ => Self::msg(result.to_string()),
        }
    }
}

impl From<NoSuchMethod> for ApplicationError {
    fn from(err: NoSuchMethod) -> Self {
        Self::new("NoSuchMethod", err.to_string())
    }
}

/// Why a call the server made to the client did not produce a value.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The client answered with `success = false`.
    #[error("remote failure: {0}")]
    Remote(ApplicationError),
    /// The session disconnected before the response arrived.
    #[error("session disconnected before the response arrived: {0}")]
    Disconnected(DisconnectReason),
    /// The session task is no longer running.
    #[error("session is gone")]
    SessionGone,
}

impl CallError {
    /// Stable code for logs and metrics.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Remote(_) => "REMOTE_FAILURE",
            Self::Disconnected(_) => "DISCONNECTED",
            Self::SessionGone => "SESSION_GONE",
        }
    }
}

/// The wire data could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON syntax or shape error.
    #[error("malformed basket: {0}")]
    Malformed(#[from] serde_json::Error),
}
