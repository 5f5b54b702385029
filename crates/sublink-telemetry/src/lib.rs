//! # sublink-telemetry
//!
//! `tracing` subscriber setup: an env-filter (overridable through `RUST_LOG`),
//! JSON or human-readable output, and per-module level overrides.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Output format for log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable lines.
    Pretty,
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `"sublink_server::keepalive"` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Output format.
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Json,
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
    /// A `target=level` override could not be read.
    #[error("invalid module level '{0}', expected target=level")]
    InvalidModuleLevel(String),
}

/// Parse a `target=level` override such as `sublink_server::keepalive=debug`.
pub fn parse_module_level(directive: &str) -> Result<(String, Level), TelemetryError> {
    let invalid = || TelemetryError::InvalidModuleLevel(directive.to_string());
    let (target, level) = directive.split_once('=').ok_or_else(invalid)?;
    let target = target.trim();
    if target.is_empty() {
        return Err(invalid());
    }
    let level = level.trim().parse::<Level>().map_err(|_| invalid())?;
    Ok((target.to_string(), level))
}

/// Build the `EnvFilter` directive string for a base level plus overrides.
pub fn filter_directives(base: Level, module_levels: &[(String, Level)]) -> String {
    let mut directives = base.to_string().to_lowercase();
    for (module, level) in module_levels {
        directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directives
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let directives = filter_directives(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let json_layer = (config.format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let pretty_layer = (config.format == LogFormat::Pretty)
        .then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| TelemetryError::Install(e.to_string()))
}
