//! The duplex connection a session runs over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use sublink_core::{ConnectionId, TransportError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Mutable key/value bag attached to a connection.
pub type UserProperties = DashMap<String, Value>;

/// A message-oriented duplex channel to one client.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable id for logging and registry keys.
    fn id(&self) -> &ConnectionId;

    /// Whether frames can still be sent.
    fn is_open(&self) -> bool;

    /// Send one text frame. Waits while the outbound queue is full.
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    fn close(&self);

    /// Session-scoped properties (handshake request, connect result, ...).
    fn user_properties(&self) -> &UserProperties;
}

/// A connection backed by a WebSocket writer task.
///
/// Frames go through a bounded channel, so a slow client makes senders wait
/// instead of growing an unbounded buffer.
pub struct WsConnection {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    open: AtomicBool,
    closed: CancellationToken,
    properties: UserProperties,
    connected_at: Instant,
}

impl WsConnection {
    /// Create a connection feeding `tx`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            open: AtomicBool::new(true),
            closed: CancellationToken::new(),
            properties: DashMap::new(),
            connected_at: Instant::now(),
        }
    }

    /// Token cancelled once [`Connection::close`] is called.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    async fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.tx.send(text).await.map_err(|_| {
            self.open.store(false, Ordering::Release);
            TransportError::Closed
        })
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.closed.cancel();
        }
    }

    fn user_properties(&self) -> &UserProperties {
        &self.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_connection(capacity: usize) -> (WsConnection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (WsConnection::new(ConnectionId::from_raw("conn_1"), tx), rx)
    }

    #[tokio::test]
    async fn send_reaches_writer() {
        let (conn, mut rx) = make_connection(4);
        conn.send("hello".into()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (conn, _rx) = make_connection(4);
        conn.close();
        assert!(!conn.is_open());
        assert_matches!(conn.send("x".into()).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn dropped_writer_marks_connection_closed() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(!conn.is_open());
        assert_matches!(conn.send("x".into()).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_cancels_token() {
        let (conn, _rx) = make_connection(4);
        let token = conn.closed_token();
        conn.close();
        conn.close();
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_makes_sender_wait() {
        let (conn, mut rx) = make_connection(1);
        conn.send("first".into()).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), conn.send("second".into())).await;
        assert!(blocked.is_err(), "second send should wait for capacity");

        assert_eq!(rx.recv().await.unwrap(), "first");
        conn.send("third".into()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "third");
    }

    #[test]
    fn user_properties_are_shared() {
        let (conn, _rx) = make_connection(1);
        let _ = conn
            .user_properties()
            .insert("k".into(), serde_json::json!(1));
        assert_eq!(
            conn.user_properties().get("k").map(|v| v.clone()),
            Some(serde_json::json!(1))
        );
        assert_eq!(conn.id().as_str(), "conn_1");
    }
}
