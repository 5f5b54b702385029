//! Single-operation protocol for clients that negotiate no sub-protocol.
//!
//! The text frame is a bare GraphQL request. Its first result is answered with
//! `subscription_success`, later ones with `data`, and the connection closes
//! when the stream ends. Kept for older clients only.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use sublink_core::{GraphQLRequest, ProtocolError, ProtocolMessage};
use tracing::{debug, instrument, warn};

use super::{SubscriptionProtocolHandler, end_session, send_or_log};
use crate::listener::ConnectionListener;
use crate::metrics::PROTOCOL_ERRORS_TOTAL;
use crate::operation::{Delivery, OperationRunner};
use crate::session::Session;

/// Handler for connections without a negotiated sub-protocol.
pub struct FallbackProtocol {
    runner: OperationRunner,
    listener: Arc<dyn ConnectionListener>,
}

impl FallbackProtocol {
    /// Create the handler.
    pub fn new(runner: OperationRunner, listener: Arc<dyn ConnectionListener>) -> Self {
        Self { runner, listener }
    }
}

#[async_trait]
impl SubscriptionProtocolHandler for FallbackProtocol {
    fn name(&self) -> &'static str {
        "fallback"
    }

    #[instrument(skip_all, fields(connection_id = %session.id()))]
    async fn on_message(&self, session: &Arc<Session>, text: &str) {
        if session.is_closed() {
            return;
        }
        let request: GraphQLRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => return self.on_malformed(session, ProtocolError::Malformed(e.to_string())).await,
        };

        // The connection carries one operation, keyed by its own id.
        let id = session.id().to_string();
        let ticket = match session.operations().subscribe(&id) {
            Ok(ticket) => ticket,
            Err(error) => {
                counter!(PROTOCOL_ERRORS_TOTAL, "kind" => error.error_kind()).increment(1);
                send_or_log(session, &ProtocolMessage::error(id.as_str(), error.to_string())).await;
                return;
            }
        };
        debug!("running single operation");
        self.listener.on_start(session, &id, &request).await;
        let input = session.invocation_input(request);
        let _ = self
            .runner
            .spawn(session.clone(), ticket, input, Delivery::Dedicated);
    }

    async fn on_malformed(&self, session: &Arc<Session>, error: ProtocolError) {
        if session.is_closed() {
            return;
        }
        counter!(PROTOCOL_ERRORS_TOTAL, "kind" => error.error_kind()).increment(1);
        warn!(%error, "unreadable request");
        send_or_log(session, &ProtocolMessage::connection_scoped_error(error.to_string())).await;
    }

    async fn on_close(&self, session: &Arc<Session>) {
        end_session(session, self.listener.as_ref(), None).await;
    }
}
