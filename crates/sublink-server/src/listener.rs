//! Connection lifecycle hooks.

use async_trait::async_trait;
use serde_json::Value;
use sublink_core::GraphQLRequest;

use crate::session::Session;

/// Returned by [`ConnectionListener::on_connect`] to refuse a connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConnectionRejected {
    /// Sent to the client in the `connection_error` payload.
    pub message: String,
}

impl ConnectionRejected {
    /// Rejection with a client-visible message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Observes and gates the life of every connection. All methods default to no-ops.
#[async_trait]
pub trait ConnectionListener: Send + Sync {
    /// Called on `connection_init`. A returned value is stored in the
    /// connection's user properties under `connect_result`.
    async fn on_connect(
        &self,
        _session: &Session,
        _payload: Option<&Value>,
    ) -> Result<Option<Value>, ConnectionRejected> {
        Ok(None)
    }

    /// Called after an operation is registered, before it executes.
    async fn on_start(&self, _session: &Session, _id: &str, _request: &GraphQLRequest) {}

    /// Called when a client stops a running operation.
    async fn on_stop(&self, _session: &Session, _id: &str) {}

    /// Called once when the session closes, whatever the cause.
    async fn on_terminate(&self, _session: &Session) {}
}

/// Accepts everything, observes nothing.
pub struct NoopListener;

impl ConnectionListener for NoopListener {}
