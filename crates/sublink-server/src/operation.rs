//! Runs one registered operation to its terminal message.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use metrics::{counter, gauge};
use sublink_core::{
    ExecutionError, GraphQLInvocationInput, OperationKind, ProtocolMessage, QueryExecutor,
    ResultStream,
};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::metrics::{OPERATIONS_ACTIVE, OPERATIONS_FINISHED_TOTAL, OPERATIONS_STARTED_TOTAL};
use crate::operations::OperationTicket;
use crate::sender::{BackpressureSender, FrameStream, SendOutcome};
use crate::session::Session;

/// How results reach the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Many operations share the connection. Every result is a `data` frame
    /// and the operation ends with exactly one `complete` or `error`.
    Multiplexed,
    /// The connection carries this one operation. The first result is a
    /// `subscription_success`, later ones `data`, and the connection closes
    /// when the stream ends.
    Dedicated,
}

/// Drives operations against a query executor.
#[derive(Clone)]
pub struct OperationRunner {
    executor: Arc<dyn QueryExecutor>,
}

impl OperationRunner {
    /// Runner backed by `executor`.
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }

    /// Run the operation on its own task.
    pub fn spawn(
        &self,
        session: Arc<Session>,
        ticket: OperationTicket,
        input: GraphQLInvocationInput,
        delivery: Delivery,
    ) -> JoinHandle<SendOutcome> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(session, ticket, input, delivery).await })
    }

    /// Execute, stream results, send the terminal frame and unregister.
    #[instrument(skip_all, fields(connection_id = %session.id(), operation_id = %ticket.id()))]
    pub async fn run(
        &self,
        session: Arc<Session>,
        ticket: OperationTicket,
        input: GraphQLInvocationInput,
        delivery: Delivery,
    ) -> SendOutcome {
        let kind = input.request().operation_kind();
        debug!(kind = kind.as_str(), "operation started");
        counter!(OPERATIONS_STARTED_TOTAL, "kind" => kind.as_str()).increment(1);
        gauge!(OPERATIONS_ACTIVE).increment(1.0);

        let outcome = match self.results(kind, input, &ticket).await {
            Ok(results) => {
                let frames = frame_results(results, session.clone(), ticket.clone(), delivery);
                let connection = session.connection().clone();
                let sender = match delivery {
                    Delivery::Multiplexed => BackpressureSender::new(connection),
                    Delivery::Dedicated => BackpressureSender::dedicated(connection),
                };
                sender.run(frames, ticket.token()).await
            }
            Err(error) => {
                warn!(%error, "executor rejected operation");
                SendOutcome::Failed { sent: 0, error }
            }
        };

        send_terminal(&session, &ticket, delivery, &outcome).await;
        let _ = session.operations().complete(&ticket);

        gauge!(OPERATIONS_ACTIVE).decrement(1.0);
        counter!(OPERATIONS_FINISHED_TOTAL, "outcome" => outcome_label(&outcome)).increment(1);
        debug!(?outcome, "operation finished");
        outcome
    }

    async fn results(
        &self,
        kind: OperationKind,
        input: GraphQLInvocationInput,
        ticket: &OperationTicket,
    ) -> Result<ResultStream, ExecutionError> {
        if kind == OperationKind::Subscription {
            return tokio::select! {
                biased;
                () = ticket.token().cancelled() => Ok(stream::empty().boxed()),
                result = self.executor.execute_subscription(input) => result,
            };
        }
        let executor = self.executor.clone();
        Ok(stream::once(async move { Ok(executor.execute(input).await) }).boxed())
    }
}

/// Tag each result with the operation id, dropping anything produced after
/// the operation was unregistered.
fn frame_results(
    results: ResultStream,
    session: Arc<Session>,
    ticket: OperationTicket,
    delivery: Delivery,
) -> FrameStream {
    let id = ticket.id().to_string();
    results
        .take_while(move |_| futures::future::ready(session.operations().is_current(&ticket)))
        .enumerate()
        .map(move |(index, result)| {
            result.map(|result| match delivery {
                Delivery::Dedicated if index == 0 => {
                    ProtocolMessage::subscription_success(id.as_str(), &result)
                }
                _ => ProtocolMessage::data(id.as_str(), &result),
            })
        })
        .boxed()
}

async fn send_terminal(
    session: &Session,
    ticket: &OperationTicket,
    delivery: Delivery,
    outcome: &SendOutcome,
) {
    let message = match (delivery, outcome) {
        (_, SendOutcome::Disconnected { .. })
        | (Delivery::Dedicated, SendOutcome::Completed { .. } | SendOutcome::Cancelled { .. }) => {
            return;
        }
        (Delivery::Multiplexed, SendOutcome::Completed { .. } | SendOutcome::Cancelled { .. }) => {
            ProtocolMessage::complete(ticket.id())
        }
        (_, SendOutcome::Failed { error, .. }) => ProtocolMessage::error(ticket.id(), error.to_string()),
    };
    if let Err(error) = session.send(&message).await {
        debug!(%error, kind = %message.kind, "terminal frame not delivered");
    }
    if delivery == Delivery::Dedicated {
        session.connection().close();
    }
}

fn outcome_label(outcome: &SendOutcome) -> &'static str {
    match outcome {
        SendOutcome::Completed { .. } => "completed",
        SendOutcome::Failed { .. } => "failed",
        SendOutcome::Cancelled { .. } => "cancelled",
        SendOutcome::Disconnected { .. } => "disconnected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use sublink_core::{ContextSetting, GraphQLRequest};

    use crate::connection::Connection;
    use crate::testutil::{RecordingConnection, ScriptedExecutor};

    fn setup() -> (Arc<Session>, Arc<RecordingConnection>, OperationRunner) {
        let conn = RecordingConnection::new();
        let session = Arc::new(Session::new(conn.clone(), "graphql-ws", ContextSetting::PerQuery));
        (session, conn, OperationRunner::new(Arc::new(ScriptedExecutor)))
    }

    async fn run(
        session: &Arc<Session>,
        runner: &OperationRunner,
        id: &str,
        query: &str,
        delivery: Delivery,
    ) -> SendOutcome {
        let ticket = session.operations().subscribe(id).unwrap();
        let input = session.invocation_input(GraphQLRequest::new(query));
        runner.run(session.clone(), ticket, input, delivery).await
    }

    #[tokio::test]
    async fn query_sends_data_then_complete() {
        let (session, conn, runner) = setup();
        let outcome = run(&session, &runner, "1", "{ hello }", Delivery::Multiplexed).await;

        assert_eq!(outcome, SendOutcome::Completed { sent: 1 });
        let frames = conn.frames();
        assert_eq!(
            frames[0],
            json!({"type": "data", "id": "1", "payload": {"data": {"hello": "world"}}})
        );
        assert_eq!(frames[1], json!({"type": "complete", "id": "1"}));
        assert_eq!(frames.len(), 2);
        assert!(session.operations().is_empty());
    }

    #[tokio::test]
    async fn subscription_streams_every_result() {
        let (session, conn, runner) = setup();
        let _ = run(&session, &runner, "s", "subscription { count }", Delivery::Multiplexed).await;
        assert_eq!(conn.types(), vec!["data", "data", "data", "complete"]);
        assert!(conn.frames().iter().all(|f| f["id"] == "s"));
    }

    #[tokio::test]
    async fn stream_failure_ends_with_error() {
        let (session, conn, runner) = setup();
        let outcome = run(&session, &runner, "f", "subscription { flaky }", Delivery::Multiplexed).await;
        assert!(matches!(outcome, SendOutcome::Failed { sent: 1, .. }));
        let frames = conn.frames();
        assert_eq!(conn.types(), vec!["data", "error"]);
        assert_eq!(
            frames[1]["payload"]["message"],
            "result stream failed: upstream went away"
        );
    }

    #[tokio::test]
    async fn executor_rejection_sends_only_error() {
        let (session, conn, runner) = setup();
        let _ = run(&session, &runner, "r", "subscription { forbidden }", Delivery::Multiplexed).await;
        assert_eq!(conn.types(), vec!["error"]);
        assert!(session.operations().is_empty());
    }

    #[tokio::test]
    async fn stop_cancels_and_completes_once() {
        let (session, conn, runner) = setup();
        let ticket = session.operations().subscribe("t").unwrap();
        let input = session.invocation_input(GraphQLRequest::new("subscription { ticks }"));
        let task = runner.spawn(session.clone(), ticket, input, Delivery::Multiplexed);

        conn.wait_for(2).await;
        assert!(session.operations().unsubscribe("t"));
        // Either the token or the registry check ends the stream first.
        let outcome = task.await.unwrap();
        assert!(matches!(
            outcome,
            SendOutcome::Cancelled { .. } | SendOutcome::Completed { .. }
        ));

        let types = conn.types();
        assert_eq!(types.last().map(String::as_str), Some("complete"));
        assert_eq!(types.iter().filter(|t| *t == "complete").count(), 1);

        let settled = conn.sent_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(conn.sent_count(), settled, "no frames after stop");
    }

    #[tokio::test]
    async fn session_close_sends_nothing_further() {
        let (session, conn, runner) = setup();
        let ticket = session.operations().subscribe("t").unwrap();
        let input = session.invocation_input(GraphQLRequest::new("subscription { ticks }"));
        let task = runner.spawn(session.clone(), ticket, input, Delivery::Multiplexed);

        conn.wait_for(1).await;
        assert!(session.close());
        let _ = task.await.unwrap();
        assert!(!conn.types().contains(&"complete".to_string()));
    }

    #[tokio::test]
    async fn dedicated_delivery_confirms_first_result_and_closes() {
        let (session, conn, runner) = setup();
        let outcome = run(&session, &runner, "conn", "subscription { count }", Delivery::Dedicated).await;
        assert_eq!(outcome, SendOutcome::Completed { sent: 3 });
        assert_eq!(conn.types(), vec!["subscription_success", "data", "data"]);
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn dedicated_failure_sends_error_and_closes() {
        let (session, conn, runner) = setup();
        let _ = run(&session, &runner, "conn", "subscription { flaky }", Delivery::Dedicated).await;
        assert_eq!(conn.types(), vec!["subscription_success", "error"]);
        assert!(!conn.is_open());
    }
}
