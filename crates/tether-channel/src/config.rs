//! Channel timer configuration.

use std::time::Duration;

/// The three channel timers.
///
/// Defaults follow a 30 second unit: connect 2x, no-transport 1x, idle 10x.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelTimeouts {
    /// How long to wait for the first transport slot.
    pub connect: Duration,
    /// How long the slot pool may stay empty once connected.
    pub no_transport: Duration,
    /// How long a slot may be held idle before it is answered empty.
    pub idle_slot: Duration,
}

impl ChannelTimeouts {
    /// Build from whole seconds.
    pub const fn from_secs(connect: u64, no_transport: u64, idle_slot: u64) -> Self {
        Self {
            connect: Duration::from_secs(connect),
            no_transport: Duration::from_secs(no_transport),
            idle_slot: Duration::from_secs(idle_slot),
        }
    }
}

impl Default for ChannelTimeouts {
    fn default() -> Self {
        Self::from_secs(60, 30, 300)
    }
}
