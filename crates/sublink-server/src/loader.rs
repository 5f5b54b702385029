//! Configuration loading with deep merge and environment overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a JSON file is given and exists, deep-merge its values over defaults
//! 3. Apply `SUBLINK_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use sublink_core::ConfigError;
use tracing::{debug, warn};

use crate::config::ServerConfig;

/// Load configuration from an optional file plus the process environment.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    load_config_with(path, |name| std::env::var(name).ok())
}

/// Same as [`load_config`], reading overrides through `lookup`.
pub fn load_config_with(
    path: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServerConfig, ConfigError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "config file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut config: ServerConfig = serde_json::from_value(merged)?;
    apply_overrides(&mut config, lookup);
    Ok(config)
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

/// Apply `SUBLINK_*` overrides. Invalid values are ignored with a warning.
pub fn apply_overrides(config: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("SUBLINK_HOST") {
        config.host = v;
    }
    if let Some(v) = read("SUBLINK_PORT") {
        match parse_range::<u16>(&v, 0, u16::MAX) {
            Some(port) => config.port = port,
            None => warn!(key = "SUBLINK_PORT", value = %v, "invalid env override, ignoring"),
        }
    }
    if let Some(v) = read("SUBLINK_PATH") {
        config.path = v;
    }
    if let Some(v) = read("SUBLINK_KEEP_ALIVE_MS") {
        match parse_range::<u64>(&v, 0, 3_600_000) {
            Some(ms) => config.keep_alive_interval_ms = ms,
            None => warn!(key = "SUBLINK_KEEP_ALIVE_MS", value = %v, "invalid env override, ignoring"),
        }
    }
    if let Some(v) = read("SUBLINK_KEEP_ALIVE_WORKERS") {
        match parse_range::<usize>(&v, 1, 256) {
            Some(n) => config.keep_alive_workers = n,
            None => warn!(key = "SUBLINK_KEEP_ALIVE_WORKERS", value = %v, "invalid env override, ignoring"),
        }
    }
    if let Some(v) = read("SUBLINK_CONTEXT_SETTING") {
        config.context_setting = Some(v);
    }
    if let Some(v) = read("SUBLINK_MAX_MESSAGE_SIZE") {
        match parse_range::<usize>(&v, 1024, 256 * 1024 * 1024) {
            Some(n) => config.max_message_size = n,
            None => warn!(key = "SUBLINK_MAX_MESSAGE_SIZE", value = %v, "invalid env override, ignoring"),
        }
    }
    if let Some(v) = read("SUBLINK_SEND_QUEUE_CAPACITY") {
        match parse_range::<usize>(&v, 1, 65_536) {
            Some(n) => config.send_queue_capacity = n,
            None => warn!(key = "SUBLINK_SEND_QUEUE_CAPACITY", value = %v, "invalid env override, ignoring"),
        }
    }
    if let Some(v) = read("SUBLINK_SHUTDOWN_TIMEOUT_MS") {
        match parse_range::<u64>(&v, 0, 600_000) {
            Some(n) => config.shutdown_timeout_ms = n,
            None => warn!(key = "SUBLINK_SHUTDOWN_TIMEOUT_MS", value = %v, "invalid env override, ignoring"),
        }
    }
}

/// Parse a number and check it lies within `min..=max`.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
