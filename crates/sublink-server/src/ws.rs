//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use serde_json::Value;
use sublink_core::context::HANDSHAKE_REQUEST_KEY;
use sublink_core::{ConnectionId, ContextSetting, ProtocolError};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::connection::{Connection, WsConnection};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::protocol::SubscriptionProtocolHandler;
use crate::session::Session;
use crate::tracker::SessionTracker;

/// How long the writer may take to flush queued frames after close.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-connection settings taken from the server configuration.
#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    /// Context-sharing mode for operations on this connection.
    pub context_setting: ContextSetting,
    /// Outbound frames buffered before senders wait.
    pub send_queue_capacity: usize,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Stores the handshake request on the connection
/// 2. Forwards outbound frames through a bounded queue to the socket
/// 3. Hands every inbound text frame to the negotiated protocol handler
/// 4. Lets the handler clean up once either side closes
#[instrument(skip_all, fields(connection_id = tracing::field::Empty, protocol = handler.name()))]
pub async fn run_ws_session(
    ws: WebSocket,
    handshake: Value,
    handler: Arc<dyn SubscriptionProtocolHandler>,
    tracker: Arc<SessionTracker>,
    settings: SessionSettings,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<String>(settings.send_queue_capacity.max(1));
    let connection = Arc::new(WsConnection::new(ConnectionId::new(), send_tx));
    let _ = tracing::Span::current().record("connection_id", connection.id().as_str());
    let _ = connection
        .user_properties()
        .insert(HANDSHAKE_REQUEST_KEY.into(), handshake);

    let session = Arc::new(Session::new(
        connection.clone(),
        handler.name(),
        settings.context_setting,
    ));
    tracker.add(session.clone());

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL, "protocol" => handler.name()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // Queued frames are flushed before the close frame goes out.
    let writer_closed = connection.closed_token();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = send_rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                    None => break,
                },
                () = writer_closed.cancelled() => break,
            }
        }
        while let Ok(text) = send_rx.try_recv() {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
        let _ = ws_tx.close().await;
    });

    let reader_closed = connection.closed_token();
    loop {
        let msg = tokio::select! {
            () = reader_closed.cancelled() => {
                debug!("connection closed by server");
                break;
            }
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => handler.on_message(&session, text.as_str()).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => handler.on_message(&session, text).await,
                Err(error) => {
                    let error = ProtocolError::Malformed(format!("binary frame is not UTF-8: {error}"));
                    handler.on_malformed(&session, error).await;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                info!("client sent close frame");
                break;
            }
            Some(Err(error)) => {
                debug!(%error, "websocket read failed");
                break;
            }
            None => break,
        }
    }

    handler.on_close(&session).await;
    connection.close();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    let _ = tracker.remove(session.id());

    let age = connection.age();
    info!(age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(age.as_secs_f64());
}
