//! `SublinkServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Map, Value, json};
use sublink_core::{ContextSetting, QueryExecutor};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::keepalive::KeepAliveScheduler;
use crate::listener::ConnectionListener;
use crate::operation::OperationRunner;
use crate::protocol::{ProtocolSelector, SUPPORTED_PROTOCOLS};
use crate::shutdown::ShutdownCoordinator;
use crate::tracker::SessionTracker;
use crate::ws::{SessionSettings, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live sessions.
    pub tracker: Arc<SessionTracker>,
    /// Protocol handlers, picked per connection.
    pub protocols: Arc<ProtocolSelector>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Validated configuration.
    pub config: Arc<ServerConfig>,
    /// Resolved context-sharing mode.
    pub context_setting: ContextSetting,
}

/// The subscription server.
pub struct SublinkServer {
    config: Arc<ServerConfig>,
    context_setting: ContextSetting,
    tracker: Arc<SessionTracker>,
    protocols: Arc<ProtocolSelector>,
    keep_alive: Arc<KeepAliveScheduler>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl SublinkServer {
    /// Validate `config` and start the keep-alive workers.
    pub fn new(
        config: ServerConfig,
        executor: Arc<dyn QueryExecutor>,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<Self, ServerError> {
        let context_setting = config.validate()?;
        let keep_alive = Arc::new(KeepAliveScheduler::new(
            config.keep_alive_interval(),
            config.keep_alive_workers,
        ));
        keep_alive.start()?;
        let protocols = Arc::new(ProtocolSelector::new(
            OperationRunner::new(executor),
            listener,
            keep_alive.clone(),
        ));
        Ok(Self {
            config: Arc::new(config),
            context_setting,
            tracker: Arc::new(SessionTracker::new()),
            protocols,
            keep_alive,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        })
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            tracker: self.tracker.clone(),
            protocols: self.protocols.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            context_setting: self.context_setting,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(&self.config.path, get(ws_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until [`SublinkServer::shutdown`].
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%local_addr, path = %self.config.path, "sublink server listening");
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(error) = served {
                warn!(%error, "server stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Stop accepting connections, close every session and stop keep-alive.
    ///
    /// Returns how many connections were still open.
    pub fn shutdown(&self) -> usize {
        self.shutdown.shutdown();
        let disconnected = self.tracker.disconnect_all();
        self.keep_alive.shutdown();
        info!(disconnected, "server shut down");
        disconnected
    }

    /// [`SublinkServer::shutdown`], then wait up to the configured shutdown
    /// timeout for the listener task from [`SublinkServer::listen`].
    ///
    /// Returns `false` if the listener did not finish in time.
    pub async fn shutdown_gracefully(&self, handle: JoinHandle<()>) -> bool {
        let _ = self.shutdown();
        self.shutdown
            .graceful_shutdown(vec![handle], self.config.shutdown_timeout())
            .await
    }

    /// Live sessions.
    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    /// Keep-alive scheduler.
    pub fn keep_alive(&self) -> &Arc<KeepAliveScheduler> {
        &self.keep_alive
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Resolved context-sharing mode.
    pub fn context_setting(&self) -> ContextSetting {
        self.context_setting
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.tracker.count(),
        state.tracker.active_operations(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// WebSocket upgrade on the configured path.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let ws = ws
        .protocols(SUPPORTED_PROTOCOLS)
        .max_message_size(state.config.max_message_size);
    let negotiated = ws
        .selected_protocol()
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let handler = state.protocols.select(negotiated.as_deref());
    let handshake = handshake_request(&uri, &headers, negotiated.as_deref());
    let settings = SessionSettings {
        context_setting: state.context_setting,
        send_queue_capacity: state.config.send_queue_capacity,
    };
    let tracker = state.tracker.clone();
    ws.on_upgrade(move |socket| run_ws_session(socket, handshake, handler, tracker, settings))
}

/// Snapshot of the upgrade request handed to executors as the handshake.
fn handshake_request(uri: &Uri, headers: &HeaderMap, subprotocol: Option<&str>) -> Value {
    let headers: Map<String, Value> = headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_owned(), Value::String(value.to_owned())))
        })
        .collect();
    json!({
        "path": uri.path(),
        "query": uri.query(),
        "headers": headers,
        "subprotocol": subprotocol,
        "connectedAt": chrono::Utc::now().to_rfc3339(),
    })
}
