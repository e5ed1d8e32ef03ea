//! Channel error type.

/// Errors reported by the channel.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// `close()` was called on a channel that is already stopped.
    #[error("channel already closed")]
    AlreadyClosed,
    /// The slot was discarded without being answered.
    #[error("transport slot abandoned without an answer")]
    SlotAbandoned,
}

impl ChannelError {
    /// Stable code for logs.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyClosed => "CHANNEL_ALREADY_CLOSED",
            Self::SlotAbandoned => "SLOT_ABANDONED",
        }
    }
}
