//! Session error type.

use tether_channel::ChannelError;

/// Errors reported by session operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// `activate` was called on a session that already has a client id.
    #[error("session already activated")]
    AlreadyActivated,
    /// The session task has exited.
    #[error("session task has stopped")]
    Gone,
    /// The underlying channel rejected the operation.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl SessionError {
    /// Stable code for logs.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyActivated => "SESSION_ALREADY_ACTIVATED",
            Self::Gone => "SESSION_GONE",
            Self::Channel(err) => err.code(),
        }
    }
}
