//! # sublink
//!
//! GraphQL subscription server binary: loads configuration, installs logging
//! and metrics, and serves the demo executor over WebSocket.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sublink_server::{ServerConfig, SublinkServer, load_config};
use sublink_telemetry::{LogFormat, TelemetryConfig, init_telemetry, parse_module_level};
use tracing::Level;

use crate::demo::{DemoExecutor, DemoListener};

/// GraphQL subscription server.
#[derive(Parser, Debug)]
#[command(name = "sublink", about = "GraphQL subscription transport server")]
struct Cli {
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// WebSocket route (overrides config).
    #[arg(long)]
    path: Option<String>,

    /// Keep-alive period in milliseconds, 0 disables (overrides config).
    #[arg(long)]
    keep_alive_ms: Option<u64>,

    /// Context-sharing mode: `per-query` or `per-request` (overrides config).
    #[arg(long)]
    context_setting: Option<String>,

    /// Default log level.
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Per-module level override as `target=level`; repeatable.
    #[arg(long = "log-module", value_parser = parse_module_level)]
    log_modules: Vec<(String, Level)>,

    /// Log output format.
    #[arg(long, default_value = "json", value_parser = ["json", "pretty"])]
    log_format: String,

    /// Do not serve Prometheus metrics.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level,
            module_levels: self.log_modules.clone(),
            format: if self.log_format == "pretty" {
                LogFormat::Pretty
            } else {
                LogFormat::Json
            },
        }
    }

    /// Command-line flags win over the file and environment.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = &self.path {
            config.path.clone_from(path);
        }
        if let Some(ms) = self.keep_alive_ms {
            config.keep_alive_interval_ms = ms;
        }
        if let Some(setting) = &self.context_setting {
            config.context_setting = Some(setting.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli.telemetry()).context("Failed to initialize logging")?;

    let mut config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);

    let mut server = SublinkServer::new(config, Arc::new(DemoExecutor), Arc::new(DemoListener))
        .context("Failed to create server")?;
    if !cli.no_metrics {
        let handle = sublink_server::metrics::install_recorder()
            .context("Failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let (addr, handle) = server.listen().await.context("Failed to bind")?;
    tracing::info!(
        "sublink listening on ws://{addr}{} (context setting: {})",
        server.config().path,
        server.context_setting().as_str()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if server.shutdown_gracefully(handle).await {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!("Shutdown timed out");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "sublink",
            "--port",
            "4000",
            "--keep-alive-ms",
            "0",
            "--context-setting",
            "per-request",
        ]);
        let mut config = ServerConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.port, 4000);
        assert_eq!(config.host, "127.0.0.1");
        assert!(config.keep_alive_interval().is_none());
        assert_eq!(config.context_setting.as_deref(), Some("per-request"));
    }

    #[test]
    fn telemetry_flags() {
        let cli = Cli::parse_from(["sublink", "--log-level", "debug", "--log-format", "pretty"]);
        let telemetry = cli.telemetry();
        assert_eq!(telemetry.log_level, Level::DEBUG);
        assert_eq!(telemetry.format, LogFormat::Pretty);
    }

    #[test]
    fn repeated_module_levels() {
        let cli = Cli::parse_from([
            "sublink",
            "--log-module",
            "sublink_server::keepalive=debug",
            "--log-module",
            "tower_http=warn",
        ]);
        assert_eq!(
            cli.telemetry().module_levels,
            vec![
                ("sublink_server::keepalive".to_string(), Level::DEBUG),
                ("tower_http".to_string(), Level::WARN),
            ]
        );
        assert!(Cli::try_parse_from(["sublink", "--log-module", "nolevel"]).is_err());
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["sublink", "--log-format", "xml"]).is_err());
    }
}
