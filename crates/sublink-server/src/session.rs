//! Server-side state for one physical connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use sublink_core::context::{CONNECT_RESULT_KEY, HANDSHAKE_REQUEST_KEY};
use sublink_core::{
    ConnectionId, ContextPolicy, ContextSetting, ContextSupplier, ExecutionContext,
    GraphQLInvocationInput, GraphQLRequest, ProtocolMessage, TransportError, codec,
};
use tracing::debug;

use crate::connection::{Connection, UserProperties};
use crate::operations::OperationRegistry;

/// Connection phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `connection_init`.
    Uninitialized,
    /// `connection_ack` sent; operations may start.
    Initialized,
    /// Closed; nothing more is processed.
    Terminated,
}

/// One connection, its running operations and the protocol it negotiated.
pub struct Session {
    connection: Arc<dyn Connection>,
    operations: OperationRegistry,
    state: Mutex<SessionState>,
    closed: AtomicBool,
    protocol: &'static str,
    contexts: ContextPolicy,
}

impl Session {
    /// Create a session for a freshly opened connection.
    pub fn new(
        connection: Arc<dyn Connection>,
        protocol: &'static str,
        context_setting: ContextSetting,
    ) -> Self {
        let source = connection.clone();
        let supplier: ContextSupplier =
            Arc::new(move || context_from_properties(source.user_properties()));
        Self {
            connection,
            operations: OperationRegistry::new(),
            state: Mutex::new(SessionState::Uninitialized),
            closed: AtomicBool::new(false),
            protocol,
            contexts: ContextPolicy::new(context_setting, supplier),
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// The connection's user properties.
    pub fn user_properties(&self) -> &UserProperties {
        self.connection.user_properties()
    }

    /// Running operations.
    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    /// Negotiated protocol name.
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// Current phase.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to `Initialized` unless the session already terminated.
    pub fn mark_initialized(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::Terminated {
            return false;
        }
        *state = SessionState::Initialized;
        true
    }

    /// Whether `connection_ack` has been sent.
    pub fn is_initialized(&self) -> bool {
        self.state() == SessionState::Initialized
    }

    /// Whether [`Session::close`] already ran.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Build the invocation input for one operation under this session's
    /// context-sharing mode.
    pub fn invocation_input(&self, request: GraphQLRequest) -> GraphQLInvocationInput {
        self.contexts.input(request, None)
    }

    /// Rebuild the connection-wide context from the current user properties
    /// on next use. Operations already running keep the context they have.
    pub fn refresh_context(&self) -> bool {
        self.contexts.reset()
    }

    /// Encode and send one protocol message.
    pub async fn send(&self, message: &ProtocolMessage) -> Result<(), TransportError> {
        let text = codec::encode(message)?;
        self.connection.send(text).await
    }

    /// Cancel every operation and close the connection.
    ///
    /// Safe to call more than once; only the first call does the work and
    /// returns `true`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.state.lock() = SessionState::Terminated;
        // Closed first so cancelled operations cannot send a terminal frame.
        self.connection.close();
        let cancelled = self.operations.cancel_all();
        debug!(connection_id = %self.id(), cancelled, "session closed");
        true
    }
}

/// Build a context carrying the connection's handshake and connect result.
fn context_from_properties(properties: &UserProperties) -> ExecutionContext {
    let ctx = ExecutionContext::new();
    for key in [HANDSHAKE_REQUEST_KEY, CONNECT_RESULT_KEY] {
        if let Some(value) = properties.get(key) {
            let _ = ctx.set_property(key, value.clone());
        }
    }
    ctx
}
