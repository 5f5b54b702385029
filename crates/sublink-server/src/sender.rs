//! Demand-driven delivery of a result stream over a connection.
//!
//! A producer task pulls from the stream into a channel of capacity one, and
//! only pulls again once the consumer has taken the previous frame off the
//! channel. The next item is therefore produced while the current one is
//! written, but never more than one frame waits unsent.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use sublink_core::{ExecutionError, ProtocolMessage, codec};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::Connection;

/// Protocol frames produced by one operation.
pub type FrameStream = BoxStream<'static, Result<ProtocolMessage, ExecutionError>>;

/// How a delivery run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The stream ended normally.
    Completed {
        /// Frames written.
        sent: usize,
    },
    /// The stream reported an error; nothing after it was sent.
    Failed {
        /// Frames written before the failure.
        sent: usize,
        /// The stream's error.
        error: ExecutionError,
    },
    /// The cancellation token fired.
    Cancelled {
        /// Frames written before cancellation.
        sent: usize,
    },
    /// The connection closed underneath the stream.
    Disconnected {
        /// Frames written before the connection went away.
        sent: usize,
    },
}

/// Writes a [`FrameStream`] to a connection one frame at a time.
pub struct BackpressureSender {
    connection: Arc<dyn Connection>,
    close_on_complete: bool,
}

impl BackpressureSender {
    /// Sender for a multiplexed connection; completion leaves it open.
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            close_on_complete: false,
        }
    }

    /// Sender for a connection dedicated to one stream; completion closes it.
    pub fn dedicated(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            close_on_complete: true,
        }
    }

    /// Deliver `frames` until the stream ends, fails, `cancel` fires or the
    /// connection closes. The stream is dropped before this returns.
    pub async fn run(&self, mut frames: FrameStream, cancel: &CancellationToken) -> SendOutcome {
        let (tx, mut rx) = mpsc::channel(1);
        let producer_stop = cancel.child_token();
        let stop = producer_stop.clone();
        let producer = tokio::spawn(async move {
            loop {
                let Ok(permit) = tx.reserve().await else {
                    break;
                };
                let item = tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    item = frames.next() => item,
                };
                match item {
                    Some(item) => permit.send(item),
                    None => break,
                }
            }
        });

        let mut sent = 0;
        let outcome = loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => break SendOutcome::Cancelled { sent },
                item = rx.recv() => item,
            };
            match item {
                Some(Ok(message)) => {
                    if !self.connection.is_open() {
                        break SendOutcome::Disconnected { sent };
                    }
                    let text = match codec::encode(&message) {
                        Ok(text) => text,
                        Err(error) => {
                            warn!(%error, "dropping frame that failed to encode");
                            continue;
                        }
                    };
                    if let Err(error) = self.connection.send(text).await {
                        debug!(%error, "connection closed while sending");
                        break SendOutcome::Disconnected { sent };
                    }
                    sent += 1;
                }
                Some(Err(error)) => {
                    warn!(%error, sent, "result stream failed");
                    break SendOutcome::Failed { sent, error };
                }
                None => break SendOutcome::Completed { sent },
            }
        };

        producer_stop.cancel();
        drop(rx);
        let _ = producer.await;

        if self.close_on_complete
            && matches!(outcome, SendOutcome::Completed { .. })
            && self.connection.is_open()
        {
            self.connection.close();
        }
        outcome
    }
}
