//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VigilSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Loading runs before logging is configured, since the log level itself is
//! a setting. Rejected environment values are returned to the caller to be
//! reported once a subscriber exists.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::VigilSettings;

/// Resolve the gateway home directory (`~/.vigil`).
pub fn vigil_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vigil")
}

/// Default settings file location (`~/.vigil/settings.json`).
pub fn settings_path() -> PathBuf {
    vigil_home().join("settings.json")
}

/// Resolve a configured storage path: absolute paths are kept, relative
/// ones land under `~/.vigil`.
pub fn resolve_data_path(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        vigil_home().join(path)
    }
}

/// An environment variable whose value could not be used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedEnvVar {
    pub key: &'static str,
    pub value: String,
    /// What the variable should hold, e.g. `"port"`.
    pub expected: &'static str,
}

/// Settings plus the environment overrides that were ignored.
#[derive(Clone, Debug)]
pub struct Loaded {
    pub settings: VigilSettings,
    pub rejected_env: Vec<RejectedEnvVar>,
}

impl Loaded {
    /// Report every rejected override. Call after logging is initialized.
    pub fn log_rejected(&self) {
        for rejected in &self.rejected_env {
            tracing::warn!(
                key = rejected.key,
                value = %rejected.value,
                expected = rejected.expected,
                "invalid env var, ignoring"
            );
        }
    }
}

pub fn load_settings() -> Result<Loaded> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Loaded> {
    let mut settings = load_file_layer(path)?;
    let rejected_env = apply_env_overrides(&mut settings);
    Ok(Loaded {
        settings,
        rejected_env,
    })
}

fn load_file_layer(path: &Path) -> Result<VigilSettings> {
    let defaults = serde_json::to_value(VigilSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values leave the setting untouched and are returned.
pub fn apply_env_overrides(settings: &mut VigilSettings) -> Vec<RejectedEnvVar> {
    apply_overrides(settings, |name| std::env::var(name).ok())
}

/// Override application against an arbitrary variable source.
fn apply_overrides(
    settings: &mut VigilSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<RejectedEnvVar> {
    let mut rejected = Vec::new();
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("VIGIL_HOST") {
        settings.server.host = v;
    }
    if let Some(raw) = lookup("VIGIL_PORT") {
        match parse_u16_range(&raw, 1, 65535) {
            Some(port) => settings.server.port = port,
            None => rejected.push(RejectedEnvVar {
                key: "VIGIL_PORT",
                value: raw,
                expected: "port",
            }),
        }
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = string("SECRET_KEY") {
        settings.auth.jwt_secret = Some(v);
    }

    // ── Upstream ────────────────────────────────────────────────────
    if let Some(v) = string("AGENT_SERVICE_URL") {
        settings.upstream.base_url = v;
    }
    if let Some(raw) = lookup("VIGIL_TURN_TIMEOUT_SECS") {
        let parsed = parse_u64_range(&raw, 1, 3600);
        if let Some(v) = checked(&mut rejected, "VIGIL_TURN_TIMEOUT_SECS", parsed, raw) {
            settings.upstream.turn_timeout_secs = v;
        }
    }

    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = string("VIGIL_DB_PATH") {
        settings.storage.database_path = v;
    }
    if let Some(v) = string("VIGIL_CHECKPOINT_DB_PATH") {
        settings.storage.checkpoint_database_path = v;
    }
    if let Some(raw) = lookup("VIGIL_RECONCILE_INTERVAL_SECS") {
        let parsed = parse_u64_range(&raw, 0, 86_400);
        if let Some(v) = checked(&mut rejected, "VIGIL_RECONCILE_INTERVAL_SECS", parsed, raw) {
            settings.storage.reconcile_interval_secs = v;
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("VIGIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(raw) = lookup("VIGIL_LOG_JSON") {
        match parse_bool(&raw) {
            Some(v) => settings.logging.json = v,
            None => rejected.push(RejectedEnvVar {
                key: "VIGIL_LOG_JSON",
                value: raw,
                expected: "boolean",
            }),
        }
    }

    rejected
}

/// Pass a parsed number through, recording the raw value when it was refused.
fn checked(
    rejected: &mut Vec<RejectedEnvVar>,
    key: &'static str,
    parsed: Option<u64>,
    raw: String,
) -> Option<u64> {
    if parsed.is_none() {
        rejected.push(RejectedEnvVar {
            key,
            value: raw,
            expected: "number",
        });
    }
    parsed
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
