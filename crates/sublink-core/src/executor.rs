//! The query-executor contract consumed by the transport.

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::BoxStream;

use crate::errors::ExecutionError;
use crate::invocation::{BatchedInvocationInput, GraphQLInvocationInput};
use crate::request::ExecutionResult;

/// A lazy, possibly infinite sequence of subscription results.
///
/// Dropping the stream cancels it.
pub type ResultStream = BoxStream<'static, Result<ExecutionResult, ExecutionError>>;

/// Runs GraphQL operations on behalf of the transport.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute a query or mutation to a single result.
    async fn execute(&self, input: GraphQLInvocationInput) -> ExecutionResult;

    /// Start a subscription and return its result stream.
    async fn execute_subscription(
        &self,
        input: GraphQLInvocationInput,
    ) -> Result<ResultStream, ExecutionError>;
}

/// Execute every operation of a batch concurrently.
///
/// Results are returned in request order regardless of completion order.
pub async fn execute_batch(
    executor: &dyn QueryExecutor,
    batch: BatchedInvocationInput,
) -> Vec<ExecutionResult> {
    join_all(
        batch
            .into_inputs()
            .into_iter()
            .map(|input| executor.execute(input)),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;
    use serde_json::json;

    use crate::context::{ContextSetting, ExecutionContext};
    use crate::invocation::ContextSupplier;
    use crate::request::GraphQLRequest;

    /// Echoes the document back, sleeping for `variables.delay_ms` first and
    /// counting into a loader-free context property.
    struct EchoExecutor;

    #[async_trait]
    impl QueryExecutor for EchoExecutor {
        async fn execute(&self, input: GraphQLInvocationInput) -> ExecutionResult {
            let delay = input
                .request()
                .variable("delay_ms")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let ctx = input.context();
            let seen = ctx
                .property("seen")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let _ = ctx.set_property("seen", json!(seen + 1));
            ExecutionResult::data(json!({
                "query": input.request().query,
                "context": ctx.id().as_str(),
            }))
        }

        async fn execute_subscription(
            &self,
            input: GraphQLInvocationInput,
        ) -> Result<ResultStream, ExecutionError> {
            let result = self.execute(input).await;
            Ok(futures::stream::iter(vec![Ok(result)]).boxed())
        }
    }

    fn supplier() -> ContextSupplier {
        Arc::new(ExecutionContext::new)
    }

    fn delayed(query: &str, delay_ms: u64) -> GraphQLRequest {
        let mut vars = serde_json::Map::new();
        let _ = vars.insert("delay_ms".into(), json!(delay_ms));
        GraphQLRequest::new(query).with_variables(vars)
    }

    #[tokio::test(start_paused = true)]
    async fn batch_results_keep_request_order() {
        let batch = BatchedInvocationInput::per_query(
            vec![delayed("{ slow }", 30), delayed("{ fast }", 1), delayed("{ mid }", 10)],
            &supplier(),
            None,
        );
        let results = execute_batch(&EchoExecutor, batch).await;
        let queries: Vec<_> = results
            .iter()
            .map(|r| r.data.as_ref().unwrap()["query"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(queries, vec!["{ slow }", "{ fast }", "{ mid }"]);
    }

    #[tokio::test]
    async fn per_request_batch_shares_context_across_executions() {
        let batch = BatchedInvocationInput::new(
            vec![GraphQLRequest::new("{ a }"), GraphQLRequest::new("{ b }")],
            &supplier(),
            None,
            Some(ContextSetting::PerRequest),
        )
        .unwrap();
        let shared = batch.inputs()[0].clone();
        let results = execute_batch(&EchoExecutor, batch).await;
        let ctx_a = &results[0].data.as_ref().unwrap()["context"];
        let ctx_b = &results[1].data.as_ref().unwrap()["context"];
        assert_eq!(ctx_a, ctx_b);
        assert_eq!(shared.context().property("seen"), Some(json!(2)));
    }

    #[tokio::test]
    async fn per_query_batch_isolates_contexts() {
        let batch = BatchedInvocationInput::per_query(
            vec![GraphQLRequest::new("{ a }"), GraphQLRequest::new("{ b }")],
            &supplier(),
            None,
        );
        let results = execute_batch(&EchoExecutor, batch).await;
        assert_ne!(
            results[0].data.as_ref().unwrap()["context"],
            results[1].data.as_ref().unwrap()["context"]
        );
    }

    #[tokio::test]
    async fn empty_batch_yields_no_results() {
        let batch = BatchedInvocationInput::per_query(Vec::new(), &supplier(), None);
        assert!(execute_batch(&EchoExecutor, batch).await.is_empty());
    }
}
