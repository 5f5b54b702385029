//! In-memory test doubles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use sublink_core::{
    ConnectionId, ExecutionError, ExecutionResult, GraphQLInvocationInput, GraphQLRequest,
    QueryExecutor, ResultStream, TransportError,
};

use crate::connection::{Connection, UserProperties};
use crate::listener::{ConnectionListener, ConnectionRejected};
use crate::session::Session;

/// A connection that records every frame it is asked to send.
pub struct RecordingConnection {
    id: ConnectionId,
    open: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<String>>,
    sent_at: Mutex<Vec<Instant>>,
    properties: UserProperties,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            sent_at: Mutex::new(Vec::new()),
            properties: DashMap::new(),
        })
    }

    /// Make every following send fail with an I/O error.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Wall-clock time of every successful send, in order.
    pub fn send_times(&self) -> Vec<Instant> {
        self.sent_at.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Sent frames parsed as JSON.
    pub fn frames(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    /// Sent frame types, in order.
    pub fn types(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|f| f["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Wait until at least `n` frames were sent (panics after 2s).
    pub async fn wait_for(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.sent_count() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {n} frames, got {:?}", self.sent()));
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Io("broken pipe".into()));
        }
        self.sent.lock().push(text);
        self.sent_at.lock().push(Instant::now());
        tokio::task::yield_now().await;
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn user_properties(&self) -> &UserProperties {
        &self.properties
    }
}

/// Executor whose behaviour is picked by the root field in the document.
///
/// - queries: `{ hello }` resolves to `{"hello": "world"}`; anything else echoes
///   the document and the context's `connect_result`
/// - `subscription { count }`: `variables.n` results, then completes
/// - `subscription { ticks }`: a result every 10ms, forever
/// - `subscription { flaky }`: one result, then a stream failure
/// - `subscription { forbidden }`: rejected before streaming
pub struct ScriptedExecutor;

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, input: GraphQLInvocationInput) -> ExecutionResult {
        let query = &input.request().query;
        if query.contains("hello") {
            return ExecutionResult::data(json!({ "hello": "world" }));
        }
        ExecutionResult::data(json!({
            "query": query,
            "connectResult": input.context().connect_result(),
        }))
    }

    async fn execute_subscription(
        &self,
        input: GraphQLInvocationInput,
    ) -> Result<ResultStream, ExecutionError> {
        let query = input.request().query.clone();
        if query.contains("forbidden") {
            return Err(ExecutionError::Rejected("not allowed".into()));
        }
        if query.contains("flaky") {
            let items = vec![
                Ok(ExecutionResult::data(json!({ "flaky": 1 }))),
                Err(ExecutionError::StreamFailed("upstream went away".into())),
            ];
            return Ok(futures::stream::iter(items).boxed());
        }
        if query.contains("ticks") {
            let ticks = futures::stream::unfold(0u64, |n| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Some((Ok(ExecutionResult::data(json!({ "ticks": n }))), n + 1))
            });
            return Ok(ticks.boxed());
        }
        let n = input
            .request()
            .variable("n")
            .and_then(Value::as_u64)
            .unwrap_or(3);
        Ok(futures::stream::iter(
            (0..n).map(|i| Ok(ExecutionResult::data(json!({ "count": i })))),
        )
        .boxed())
    }
}

/// Listener that records every callback and can be told to reject.
#[derive(Default)]
pub struct RecordingListener {
    reject_with: Option<String>,
    connect_result: Option<Value>,
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reject_with: Some(message.to_string()),
            ..Self::default()
        })
    }

    pub fn with_connect_result(value: Value) -> Arc<Self> {
        Arc::new(Self {
            connect_result: Some(value),
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl ConnectionListener for RecordingListener {
    async fn on_connect(
        &self,
        _session: &Session,
        payload: Option<&Value>,
    ) -> Result<Option<Value>, ConnectionRejected> {
        self.events.lock().push(format!(
            "connect:{}",
            payload.map(ToString::to_string).unwrap_or_default()
        ));
        match &self.reject_with {
            Some(message) => Err(ConnectionRejected::new(message.clone())),
            None => Ok(self.connect_result.clone()),
        }
    }

    async fn on_start(&self, _session: &Session, id: &str, _request: &GraphQLRequest) {
        self.events.lock().push(format!("start:{id}"));
    }

    async fn on_stop(&self, _session: &Session, id: &str) {
        self.events.lock().push(format!("stop:{id}"));
    }

    async fn on_terminate(&self, _session: &Session) {
        self.events.lock().push("terminate".into());
    }
}
