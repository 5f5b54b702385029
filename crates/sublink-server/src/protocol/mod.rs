//! Wire protocols a connection can negotiate.
//!
//! The handler is chosen once, at upgrade time, from the requested
//! sub-protocol: `graphql-ws` gets [`ApolloProtocol`], anything else the
//! single-operation [`FallbackProtocol`].

mod apollo;
mod fallback;

use std::sync::Arc;

use async_trait::async_trait;
use sublink_core::{GRAPHQL_WS, ProtocolError, ProtocolMessage};
use tracing::debug;

pub use apollo::ApolloProtocol;
pub use fallback::FallbackProtocol;

use crate::keepalive::KeepAliveScheduler;
use crate::listener::ConnectionListener;
use crate::operation::OperationRunner;
use crate::session::Session;

/// Drives one connection according to a wire protocol.
#[async_trait]
pub trait SubscriptionProtocolHandler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Handle one inbound text frame.
    async fn on_message(&self, session: &Arc<Session>, text: &str);

    /// Answer a frame that could not be read as text at all.
    async fn on_malformed(&self, session: &Arc<Session>, error: ProtocolError);

    /// Clean up after the connection closed. Safe to call more than once.
    async fn on_close(&self, session: &Arc<Session>);
}

/// Sub-protocols offered during the WebSocket handshake.
pub const SUPPORTED_PROTOCOLS: [&str; 1] = [GRAPHQL_WS];

/// Holds one instance of every protocol handler.
pub struct ProtocolSelector {
    apollo: Arc<ApolloProtocol>,
    fallback: Arc<FallbackProtocol>,
}

impl ProtocolSelector {
    /// Build both handlers over the same executor, listener and scheduler.
    pub fn new(
        runner: OperationRunner,
        listener: Arc<dyn ConnectionListener>,
        keep_alive: Arc<KeepAliveScheduler>,
    ) -> Self {
        Self {
            apollo: Arc::new(ApolloProtocol::new(
                runner.clone(),
                listener.clone(),
                keep_alive,
            )),
            fallback: Arc::new(FallbackProtocol::new(runner, listener)),
        }
    }

    /// Handler for the negotiated sub-protocol.
    pub fn select(&self, negotiated: Option<&str>) -> Arc<dyn SubscriptionProtocolHandler> {
        match negotiated {
            Some(GRAPHQL_WS) => self.apollo.clone(),
            _ => self.fallback.clone(),
        }
    }
}

/// Send a frame, logging instead of failing when the connection is gone.
async fn send_or_log(session: &Session, message: &ProtocolMessage) {
    if let Err(error) = session.send(message).await {
        debug!(connection_id = %session.id(), kind = %message.kind, %error, "frame not delivered");
    }
}

/// Close the session and notify the listener exactly once.
async fn end_session(
    session: &Session,
    listener: &dyn ConnectionListener,
    keep_alive: Option<&KeepAliveScheduler>,
) {
    if let Some(scheduler) = keep_alive {
        let _ = scheduler.abort(session.id());
    }
    if session.close() {
        listener.on_terminate(session).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::NoopListener;
    use crate::testutil::ScriptedExecutor;

    #[test]
    fn selects_by_negotiated_name() {
        let selector = ProtocolSelector::new(
            OperationRunner::new(Arc::new(ScriptedExecutor)),
            Arc::new(NoopListener),
            Arc::new(KeepAliveScheduler::new(None, 1)),
        );
        assert_eq!(selector.select(Some("graphql-ws")).name(), "graphql-ws");
        assert_eq!(selector.select(None).name(), "fallback");
        assert_eq!(selector.select(Some("graphql-transport-ws")).name(), "fallback");
    }
}
