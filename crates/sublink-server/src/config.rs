//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sublink_core::{ConfigError, ContextSetting};

/// Routes served next to the WebSocket endpoint.
const RESERVED_PATHS: [&str; 2] = ["/health", "/metrics"];

/// Configuration for the subscription server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Route serving the WebSocket upgrade.
    pub path: String,
    /// Keep-alive period in milliseconds. `0` disables keep-alive.
    pub keep_alive_interval_ms: u64,
    /// Worker threads in the shared keep-alive pool.
    pub keep_alive_workers: usize,
    /// Context-sharing mode name (`per-query` or `per-request`).
    pub context_setting: Option<String>,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before senders wait.
    pub send_queue_capacity: usize,
    /// How long shutdown waits for the listener task to drain, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/subscriptions".into(),
            keep_alive_interval_ms: 15_000,
            keep_alive_workers: 2,
            context_setting: Some(ContextSetting::PerQuery.as_str().into()),
            max_message_size: 1024 * 1024,
            send_queue_capacity: 64,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    /// Keep-alive period, or `None` when disabled.
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        (self.keep_alive_interval_ms > 0).then(|| Duration::from_millis(self.keep_alive_interval_ms))
    }

    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Resolve the configured context-sharing mode.
    pub fn context_setting(&self) -> Result<ContextSetting, ConfigError> {
        self.context_setting
            .as_deref()
            .ok_or(ConfigError::ContextSettingNotConfigured)?
            .parse()
    }

    /// Check every value the server depends on.
    pub fn validate(&self) -> Result<ContextSetting, ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "path must start with '/', got '{}'",
                self.path
            )));
        }
        if RESERVED_PATHS.contains(&self.path.as_str()) {
            return Err(ConfigError::InvalidValue(format!(
                "path '{}' is reserved",
                self.path
            )));
        }
        if self.keep_alive_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "keepAliveWorkers must be at least 1".into(),
            ));
        }
        if self.send_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "sendQueueCapacity must be at least 1".into(),
            ));
        }
        self.context_setting()
    }
}
