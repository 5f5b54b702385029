//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names shared across modules.

/// WebSocket connections opened (counter, labels: protocol).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Operations started (counter, labels: kind).
pub const OPERATIONS_STARTED_TOTAL: &str = "operations_started_total";
/// Running operations (gauge).
pub const OPERATIONS_ACTIVE: &str = "operations_active";
/// Operations finished (counter, labels: outcome).
pub const OPERATIONS_FINISHED_TOTAL: &str = "operations_finished_total";
/// Keep-alive frames sent (counter).
pub const KEEP_ALIVE_SENT_TOTAL: &str = "keep_alive_sent_total";
/// Connections with an active keep-alive (gauge).
pub const KEEP_ALIVE_ACTIVE: &str = "keep_alive_active";
/// Rejected inbound frames (counter, labels: kind).
pub const PROTOCOL_ERRORS_TOTAL: &str = "protocol_errors_total";
/// Connections refused by the lifecycle listener (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "connections_rejected_total";
