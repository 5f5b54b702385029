//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Signals server tasks to stop and waits for them.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not fired yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the shutdown token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the token.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown was requested.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the token, then wait up to `timeout` for `handles` to finish.
    ///
    /// Returns `false` if the wait timed out.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "waiting for tasks to complete"
        );

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(?timeout, "shutdown timed out, some tasks may still be running");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_fires_every_token() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        assert!(!coord.is_shutting_down());

        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move { token.cancelled().await });

        assert!(coord.graceful_shutdown(vec![handle], Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        let finished = coord
            .graceful_shutdown(vec![handle], Duration::from_millis(50))
            .await;
        assert!(!finished);
        assert!(coord.is_shutting_down());
    }
}
