//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown started.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Operations running across all connections.
    pub active_operations: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    operations: usize,
    shutting_down: bool,
) -> HealthResponse {
    let status = if shutting_down { "shutting_down" } else { "ok" };
    HealthResponse {
        status: status.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_operations: operations,
    }
}
