//! # tether
//!
//! Long-poll session server binary: loads settings, starts logging and
//! serves the demo root object until ctrl-c.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tether_server::{ServerConfig, TetherServer};
use tether_settings::TetherSettings;
use tether_telemetry::TelemetryConfig;

/// Tether session server.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Long-poll session server")]
struct Cli {
    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    fn load_settings(&self) -> Result<TetherSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(tether_settings::settings_path);
        let mut settings = tether_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    tether_telemetry::init_telemetry(&TelemetryConfig::from(&settings.logging))
        .context("Failed to initialize logging")?;

    let config = ServerConfig::from(&settings);
    let server = TetherServer::new(config, || Arc::new(demo::root()));
    let handle = server.start().await.context("Failed to bind server")?;

    tracing::info!("tether listening on {}{}", handle.base_url(), settings.server.mount_path);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!(sessions = handle.sessions().len(), "shutting down");
    handle.stop().await;
    tracing::info!("shutdown complete");
    Ok(())
}
