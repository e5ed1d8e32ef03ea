//! # tether-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `TETHER_*` overrides
//!
//! The merged result is validated before it is returned.
//!
//! ```no_run
//! let settings = tether_settings::load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, validate};
pub use types::{ChannelSettings, LoggingSettings, ServerSettings, TetherSettings};
