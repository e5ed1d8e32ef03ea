//! # tether-server
//!
//! HTTP binding for tether sessions.
//!
//! - `POST {mount}` creates and activates a session and returns its URLs
//! - `POST {mount}/{client_id}/input` carries a basket from the client
//! - `GET|POST {mount}/{client_id}/output` parks a long-poll slot
//! - `GET /health` reports uptime and the active session count

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod server;
pub mod shutdown;
mod transport;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{AppState, RootFactory, ServerHandle, TetherServer};
pub use shutdown::ShutdownCoordinator;
