//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SwitchboardSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SWITCHBOARD_*` environment overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{DefaultDecision, SwitchboardSettings};

/// Data directory (`~/.switchboard`).
pub fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".switchboard")
}

/// Default settings file (`~/.switchboard/settings.json`).
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Resolve a configured path against the data directory unless absolute.
pub fn resolve_data_path(configured: &str) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() {
        path
    } else {
        data_dir().join(path)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SwitchboardSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SwitchboardSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<SwitchboardSettings> {
    let defaults = serde_json::to_value(SwitchboardSettings::default())?;

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

/// Apply environment variable overrides. Invalid values are ignored with a
/// warning and the file/default value stays.
pub fn apply_env_overrides(settings: &mut SwitchboardSettings) {
    if let Some(v) = read_env_string("SWITCHBOARD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("SWITCHBOARD_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("SWITCHBOARD_AGENT_PROGRAM") {
        settings.agent.program = v;
    }
    if let Some(v) = read_env_string("SWITCHBOARD_BASE_DIR") {
        settings.agent.base_dir = v;
    }
    if let Some(v) = read_env_u64("SWITCHBOARD_WATCHDOG_SECS", 1, 86_400) {
        settings.agent.watchdog_secs = v;
    }
    if let Some(v) = read_env_u64("SWITCHBOARD_APPROVAL_TIMEOUT_SECS", 1, 3_600) {
        settings.approvals.timeout_secs = v;
    }
    if let Some(v) = read_env_decision("SWITCHBOARD_APPROVAL_DEFAULT") {
        settings.approvals.timeout_decision = v;
    }
    if let Some(v) = read_env_string("SWITCHBOARD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("SWITCHBOARD_DB") {
        settings.storage.db_path = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse `allow`/`approve` or `deny` (case-insensitive).
pub fn parse_decision(val: &str) -> Option<DefaultDecision> {
    match val.to_lowercase().as_str() {
        "allow" | "approve" => Some(DefaultDecision::Allow),
        "deny" => Some(DefaultDecision::Deny),
        _ => None,
    }
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_decision(name: &str) -> Option<DefaultDecision> {
    let val = std::env::var(name).ok()?;
    let result = parse_decision(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid decision env var, ignoring");
    }
    result
}
