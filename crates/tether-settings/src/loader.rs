//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides
//! 4. [`validate`] the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

/// Longest accepted timer, one day.
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid merged value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    load_with(path, |name| std::env::var(name).ok())
}

fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Check cross-field constraints.
///
/// Timers must be positive and at most a day, and the connect timeout may
/// not be shorter than the no-transport timeout.
pub fn validate(settings: &TetherSettings) -> Result<()> {
    let channel = &settings.channel;
    for (name, secs) in [
        ("connectTimeoutSecs", channel.connect_timeout_secs),
        ("noTransportTimeoutSecs", channel.no_transport_timeout_secs),
        ("idleSlotTimeoutSecs", channel.idle_slot_timeout_secs),
    ] {
        if secs == 0 || secs > MAX_TIMEOUT_SECS {
            return Err(SettingsError::InvalidValue(format!(
                "{name} must be between 1 and {MAX_TIMEOUT_SECS}, got {secs}"
            )));
        }
    }
    if channel.connect_timeout_secs < channel.no_transport_timeout_secs {
        return Err(SettingsError::InvalidValue(format!(
            "connectTimeoutSecs ({}) must not be shorter than noTransportTimeoutSecs ({})",
            channel.connect_timeout_secs, channel.no_transport_timeout_secs
        )));
    }
    if !settings.server.mount_path.starts_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "mountPath must start with '/', got {:?}",
            settings.server.mount_path
        )));
    }
    Ok(())
}

/// Apply `TETHER_*` overrides read through `env`.
///
/// Invalid values are ignored with a warning.
fn apply_overrides(settings: &mut TetherSettings, env: impl Fn(&str) -> Option<String>) {
    let env = EnvReader(env);

    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("TETHER_PORT", |s| s.parse::<u16>().ok()) {
        settings.server.port = v;
    }

    // ── Channel settings ────────────────────────────────────────────
    let secs = |s: &str| parse_u64_range(s, 1, MAX_TIMEOUT_SECS);
    if let Some(v) = env.parsed("TETHER_CONNECT_TIMEOUT", secs) {
        settings.channel.connect_timeout_secs = v;
    }
    if let Some(v) = env.parsed("TETHER_NO_TRANSPORT_TIMEOUT", secs) {
        settings.channel.no_transport_timeout_secs = v;
    }
    if let Some(v) = env.parsed("TETHER_IDLE_SLOT_TIMEOUT", secs) {
        settings.channel.idle_slot_timeout_secs = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("TETHER_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.0)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn write_settings(json: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, json).unwrap();
        (dir, path)
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_with(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings, TetherSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let (_dir, path) = write_settings(r#"{"server": {"port": 9000}, "logging": {"json": true}}"#);
        let settings = load_with(&path, no_env).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert!(settings.logging.json);
        assert_eq!(settings.channel.connect_timeout_secs, 60);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let (_dir, path) = write_settings("not valid json");
        let err = load_with(&path, no_env).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn inverted_timeout_ratio_is_rejected() {
        let (_dir, path) = write_settings(
            r#"{"channel": {"connectTimeoutSecs": 10, "noTransportTimeoutSecs": 20}}"#,
        );
        let err = load_with(&path, no_env).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
        assert!(err.to_string().contains("connectTimeoutSecs"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut settings = TetherSettings::default();
        settings.channel.idle_slot_timeout_secs = 0;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn mount_path_must_be_absolute() {
        let mut settings = TetherSettings::default();
        settings.server.mount_path = "live".into();
        assert!(validate(&settings).is_err());
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_file() {
        let (_dir, path) = write_settings(r#"{"server": {"port": 9000}}"#);
        let env = env_of(&[
            ("TETHER_PORT", "9100"),
            ("TETHER_HOST", "0.0.0.0"),
            ("TETHER_IDLE_SLOT_TIMEOUT", "45"),
            ("TETHER_LOG_LEVEL", "debug"),
            ("TETHER_LOG_JSON", "yes"),
        ]);
        let settings = load_with(&path, env).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.channel.idle_slot_timeout_secs, 45);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let env = env_of(&[
            ("TETHER_PORT", "not-a-port"),
            ("TETHER_CONNECT_TIMEOUT", "0"),
            ("TETHER_LOG_JSON", "maybe"),
            ("TETHER_HOST", ""),
        ]);
        let settings = load_with(Path::new("/nonexistent/settings.json"), env).unwrap();
        assert_eq!(settings, TetherSettings::default());
    }

    #[test]
    fn env_can_invert_the_ratio_and_fail() {
        let env = env_of(&[("TETHER_NO_TRANSPORT_TIMEOUT", "120")]);
        let err = load_with(Path::new("/nonexistent/settings.json"), env).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("1", 1, 10), Some(1));
        assert_eq!(parse_u64_range("10", 1, 10), Some(10));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 1, 10), None);
    }
}
