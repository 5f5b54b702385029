//! The `graphql-ws` (subscriptions-transport-ws) protocol.
//!
//! Connection phases: `Uninitialized → Initialized → Terminated`.
//!
//! | Frame | Effect |
//! |---|---|
//! | `connection_init` | listener `on_connect`; `connection_ack` + keep-alive, or `connection_error` + close |
//! | `start` | register the id, then run the operation on its own task |
//! | `stop` | cancel and unregister; the operation itself sends `complete` |
//! | `connection_terminate` | cancel everything and close |
//!
//! Bad frames are answered with `connection_error` before initialisation and
//! with an `error` afterwards; the connection stays open.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use sublink_core::context::CONNECT_RESULT_KEY;
use sublink_core::{
    GRAPHQL_WS, GraphQLRequest, MessageType, ProtocolError, ProtocolMessage, codec,
};
use tracing::{debug, info, instrument, warn};

use super::{SubscriptionProtocolHandler, end_session, send_or_log};
use crate::keepalive::KeepAliveScheduler;
use crate::listener::ConnectionListener;
use crate::metrics::{CONNECTIONS_REJECTED_TOTAL, PROTOCOL_ERRORS_TOTAL};
use crate::operation::{Delivery, OperationRunner};
use crate::session::Session;

/// Apollo-style multiplexed protocol handler.
pub struct ApolloProtocol {
    runner: OperationRunner,
    listener: Arc<dyn ConnectionListener>,
    keep_alive: Arc<KeepAliveScheduler>,
}

impl ApolloProtocol {
    /// Create the handler.
    pub fn new(
        runner: OperationRunner,
        listener: Arc<dyn ConnectionListener>,
        keep_alive: Arc<KeepAliveScheduler>,
    ) -> Self {
        Self {
            runner,
            listener,
            keep_alive,
        }
    }

    async fn handle_init(&self, session: &Arc<Session>, payload: Option<Value>) {
        match self.listener.on_connect(session, payload.as_ref()).await {
            Ok(result) => {
                if let Some(value) = result {
                    let _ = session
                        .user_properties()
                        .insert(CONNECT_RESULT_KEY.to_string(), value);
                }
                if session.refresh_context() {
                    debug!("re-initialized, shared context rebuilt on next operation");
                }
                if !session.mark_initialized() {
                    return;
                }
                send_or_log(session, &ProtocolMessage::connection_ack()).await;
                let _ = self.keep_alive.keep_alive(session.connection().clone());
                info!("connection initialized");
            }
            Err(rejected) => {
                counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                info!(reason = %rejected, "connection rejected");
                send_or_log(session, &ProtocolMessage::connection_error(rejected.message)).await;
                self.terminate(session).await;
            }
        }
    }

    async fn handle_start(&self, session: &Arc<Session>, message: ProtocolMessage) {
        let id = match message.require_id() {
            Ok(id) => id.to_string(),
            Err(error) => return self.reject(session, None, &error).await,
        };
        if !session.is_initialized() {
            return self
                .reject(session, Some(&id), &ProtocolError::NotInitialized)
                .await;
        }
        let Some(payload) = message.payload else {
            return self
                .reject(session, Some(&id), &ProtocolError::MissingPayload(id.clone()))
                .await;
        };
        let request = match GraphQLRequest::from_payload(&payload) {
            Ok(request) => request,
            Err(e) => {
                let error = ProtocolError::InvalidPayload {
                    id: id.clone(),
                    reason: e.to_string(),
                };
                return self.reject(session, Some(&id), &error).await;
            }
        };

        // Registered before anything is sent, so a racing stop always finds it.
        let ticket = match session.operations().subscribe(&id) {
            Ok(ticket) => ticket,
            Err(error) => return self.reject(session, Some(&id), &error).await,
        };
        self.listener.on_start(session, &id, &request).await;
        let input = session.invocation_input(request);
        let _ = self
            .runner
            .spawn(session.clone(), ticket, input, Delivery::Multiplexed);
    }

    async fn handle_stop(&self, session: &Arc<Session>, message: &ProtocolMessage) {
        let id = match message.require_id() {
            Ok(id) => id,
            Err(error) => return self.reject(session, None, &error).await,
        };
        if session.operations().unsubscribe(id) {
            debug!(operation_id = id, "operation stopped");
            self.listener.on_stop(session, id).await;
        } else {
            debug!(operation_id = id, "stop for an operation that is not running");
        }
    }

    async fn terminate(&self, session: &Arc<Session>) {
        end_session(session, self.listener.as_ref(), Some(self.keep_alive.as_ref())).await;
    }

    async fn reject(&self, session: &Session, id: Option<&str>, error: &ProtocolError) {
        counter!(PROTOCOL_ERRORS_TOTAL, "kind" => error.error_kind()).increment(1);
        warn!(kind = error.error_kind(), %error, "protocol error");
        let message = match id {
            Some(id) => ProtocolMessage::error(id, error.to_string()),
            None if session.is_initialized() => {
                ProtocolMessage::connection_scoped_error(error.to_string())
            }
            None => ProtocolMessage::connection_error(error.to_string()),
        };
        send_or_log(session, &message).await;
    }
}

#[async_trait]
impl SubscriptionProtocolHandler for ApolloProtocol {
    fn name(&self) -> &'static str {
        GRAPHQL_WS
    }

    #[instrument(skip_all, fields(connection_id = %session.id()))]
    async fn on_message(&self, session: &Arc<Session>, text: &str) {
        if session.is_closed() {
            debug!("frame after close ignored");
            return;
        }
        let message = match codec::decode(text) {
            Ok(message) => message,
            Err(error) => return self.reject(session, None, &error).await,
        };
        debug!(kind = %message.kind, id = ?message.id, "frame received");

        match message.kind {
            MessageType::ConnectionInit => self.handle_init(session, message.payload).await,
            MessageType::Start => self.handle_start(session, message).await,
            MessageType::Stop => self.handle_stop(session, &message).await,
            MessageType::ConnectionTerminate => self.terminate(session).await,
            other => debug!(kind = %other, "ignoring server-to-client message type"),
        }
    }

    async fn on_malformed(&self, session: &Arc<Session>, error: ProtocolError) {
        if !session.is_closed() {
            self.reject(session, None, &error).await;
        }
    }

    async fn on_close(&self, session: &Arc<Session>) {
        self.terminate(session).await;
    }
}
