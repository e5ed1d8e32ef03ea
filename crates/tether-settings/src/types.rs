//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section has `#[serde(default)]`
//! so a partial file fills in the rest from [`Default`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "channel": { "idleSlotTimeoutSecs": 120 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Channel timers.
    pub channel: ChannelSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks a free port.
    pub port: u16,
    /// Path prefix of the session endpoints.
    pub mount_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            mount_path: "/live".to_string(),
        }
    }
}

/// Channel timer settings, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// Wait for the first transport slot.
    pub connect_timeout_secs: u64,
    /// Tolerated gap with no open slot.
    pub no_transport_timeout_secs: u64,
    /// How long an idle slot is held.
    pub idle_slot_timeout_secs: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 60,
            no_transport_timeout_secs: 30,
            idle_slot_timeout_secs: 300,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module levels, e.g. `{"tether_channel": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}
