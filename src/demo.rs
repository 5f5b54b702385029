//! Built-in executor and listener so the binary can be exercised without a
//! GraphQL engine.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use sublink_core::{
    ExecutionError, ExecutionResult, GraphQLInvocationInput, QueryExecutor, ResultStream,
};
use sublink_server::{ConnectionListener, ConnectionRejected, Session};
use tracing::info;

const DEFAULT_TICK_MS: u64 = 1000;

/// Answers `{ hello }` and `{ whoami }`, and streams `subscription { ticks }`.
///
/// `ticks` honours the `intervalMs` and `limit` variables.
pub struct DemoExecutor;

#[async_trait]
impl QueryExecutor for DemoExecutor {
    async fn execute(&self, input: GraphQLInvocationInput) -> ExecutionResult {
        let query = &input.request().query;
        if query.contains("whoami") {
            let context = input.context();
            return ExecutionResult::data(json!({ "whoami": context.connect_result() }));
        }
        if query.contains("hello") {
            return ExecutionResult::data(json!({ "hello": "world" }));
        }
        ExecutionResult::error("unknown field, try { hello } or { whoami }")
    }

    async fn execute_subscription(
        &self,
        input: GraphQLInvocationInput,
    ) -> Result<ResultStream, ExecutionError> {
        let request = input.request();
        if !request.query.contains("ticks") {
            return Err(ExecutionError::Rejected(
                "unknown subscription, try subscription { ticks }".into(),
            ));
        }
        let period = Duration::from_millis(
            request
                .variable("intervalMs")
                .and_then(Value::as_u64)
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_TICK_MS),
        );
        let limit = request
            .variable("limit")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(usize::MAX);

        let ticks = futures::stream::unfold(0u64, move |n| async move {
            tokio::time::sleep(period).await;
            Some((Ok(ExecutionResult::data(json!({ "ticks": n }))), n + 1))
        });
        Ok(ticks.take(limit).boxed())
    }
}

/// Accepts every connection and hands the init payload to executors as the
/// connect result.
pub struct DemoListener;

#[async_trait]
impl ConnectionListener for DemoListener {
    async fn on_connect(
        &self,
        session: &Session,
        payload: Option<&Value>,
    ) -> Result<Option<Value>, ConnectionRejected> {
        info!(connection_id = %session.id(), protocol = session.protocol(), "client initialized");
        Ok(payload.cloned())
    }
}
