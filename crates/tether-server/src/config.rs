//! Server configuration.

use std::time::Duration;

use tether_channel::ChannelTimeouts;
use tether_settings::TetherSettings;

/// Configuration for the tether server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path prefix of the bootstrap and transport routes.
    pub mount_path: String,
    /// Timers applied to every new session's channel.
    pub timeouts: ChannelTimeouts,
    /// How long to wait for open connections when shutting down.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Mount path without a trailing slash; empty when mounted at the root.
    pub fn mount_base(&self) -> &str {
        self.mount_path.trim_end_matches('/')
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            mount_path: "/live".into(),
            timeouts: ChannelTimeouts::default(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&TetherSettings> for ServerConfig {
    fn from(settings: &TetherSettings) -> Self {
        let channel = &settings.channel;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            mount_path: settings.server.mount_path.clone(),
            timeouts: ChannelTimeouts::from_secs(
                channel.connect_timeout_secs,
                channel.no_transport_timeout_secs,
                channel.idle_slot_timeout_secs,
            ),
            ..Self::default()
        }
    }
}
