//! # tether-channel
//!
//! The reliable-delivery core of a long-poll session. A [`MessageChannel`]
//! owns the outgoing queue, the acknowledgement bookkeeping for both
//! directions, and the pool of open [`TransportSlot`]s it answers from.
//!
//! The channel never spawns tasks or sleeps. Timers are deadlines the owner
//! drives through [`MessageChannel::next_deadline`] and
//! [`MessageChannel::poll_timers`]; lifecycle notifications are queued as
//! [`ChannelEvent`]s for the owner to drain.

#![deny(unsafe_code)]

mod channel;
mod config;
mod error;
mod slot;

pub use channel::{ChannelEvent, MessageChannel, MessageSink};
pub use config::ChannelTimeouts;
pub use error::ChannelError;
pub use slot::{SlotReply, TransportSlot};
