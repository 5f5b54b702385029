//! Periodic keep-alive frames for every opted-in connection.
//!
//! The scheduler owns a small multi-thread runtime shared by all connections.
//! Each registered connection gets its own ticking task, so one dead socket
//! never delays or stops another connection's keep-alive.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use sublink_core::{ConnectionId, ProtocolMessage, codec};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::metrics::{KEEP_ALIVE_ACTIVE, KEEP_ALIVE_SENT_TOTAL};

struct KeepAliveEntry {
    token: CancellationToken,
    seq: u64,
}

type Entries = Arc<DashMap<ConnectionId, KeepAliveEntry>>;

/// Shared keep-alive timer service with an explicit `start`/`shutdown` lifecycle.
pub struct KeepAliveScheduler {
    interval: Option<Duration>,
    workers: usize,
    runtime: Mutex<Option<Runtime>>,
    handle: Mutex<Option<Handle>>,
    entries: Entries,
    next_seq: AtomicU64,
}

impl KeepAliveScheduler {
    /// Create a stopped scheduler. `None` disables keep-alive entirely.
    pub fn new(interval: Option<Duration>, workers: usize) -> Self {
        Self {
            interval,
            workers: workers.max(1),
            runtime: Mutex::new(None),
            handle: Mutex::new(None),
            entries: Arc::new(DashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Start the worker pool. Calling it again while running is a no-op.
    pub fn start(&self) -> std::io::Result<()> {
        if self.interval.is_none() {
            debug!("keep-alive disabled, not starting workers");
            return Ok(());
        }
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Ok(());
        }
        let rt = Builder::new_multi_thread()
            .worker_threads(self.workers)
            .thread_name("sublink-keepalive")
            .enable_time()
            .build()?;
        *self.handle.lock() = Some(rt.handle().clone());
        *runtime = Some(rt);
        info!(workers = self.workers, interval = ?self.interval, "keep-alive scheduler started");
        Ok(())
    }

    /// Cancel every keep-alive and stop the worker pool.
    pub fn shutdown(&self) {
        let _ = self.handle.lock().take();
        let ids: Vec<ConnectionId> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            let _ = self.abort(id);
        }
        if let Some(rt) = self.runtime.lock().take() {
            rt.shutdown_background();
            info!(cancelled = ids.len(), "keep-alive scheduler stopped");
        }
    }

    /// Whether the worker pool is running.
    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Configured period.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Start sending keep-alive frames to `connection`.
    ///
    /// The first frame goes out immediately. Returns `false` without doing
    /// anything if keep-alive is disabled, the scheduler is not running, or the
    /// connection is already registered.
    pub fn keep_alive(&self, connection: Arc<dyn Connection>) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        let Some(handle) = self.handle.lock().clone() else {
            warn!(connection_id = %connection.id(), "keep-alive requested before scheduler start");
            return false;
        };

        let token = CancellationToken::new();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.entries.entry(connection.id().clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                let _ = slot.insert(KeepAliveEntry {
                    token: token.clone(),
                    seq,
                });
            }
        }
        gauge!(KEEP_ALIVE_ACTIVE).increment(1.0);

        let entries = self.entries.clone();
        let _ = handle.spawn(run_keep_alive(connection, interval, token, entries, seq));
        true
    }

    /// Stop the keep-alive for `id`. Safe to call for unknown or already
    /// aborted connections.
    pub fn abort(&self, id: &ConnectionId) -> bool {
        match self.entries.remove(id) {
            Some((_, entry)) => {
                entry.token.cancel();
                gauge!(KEEP_ALIVE_ACTIVE).decrement(1.0);
                true
            }
            None => false,
        }
    }

    /// Whether `id` currently has a keep-alive.
    pub fn is_registered(&self, id: &ConnectionId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of connections with an active keep-alive.
    pub fn active_count(&self) -> usize {
        self.entries.len()
    }
}

impl Drop for KeepAliveScheduler {
    fn drop(&mut self) {
        if let Some(rt) = self.runtime.get_mut().take() {
            rt.shutdown_background();
        }
    }
}

async fn run_keep_alive(
    connection: Arc<dyn Connection>,
    interval: Duration,
    token: CancellationToken,
    entries: Entries,
    seq: u64,
) {
    let frame = match codec::encode(&ProtocolMessage::keep_alive()) {
        Ok(frame) => frame,
        Err(error) => {
            warn!(%error, "failed to encode keep-alive frame");
            return;
        }
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if !connection.is_open() {
            debug!(connection_id = %connection.id(), "connection closed, stopping keep-alive");
            break;
        }
        let result = tokio::select! {
            biased;
            () = token.cancelled() => return,
            result = connection.send(frame.clone()) => result,
        };
        if let Err(error) = result {
            debug!(connection_id = %connection.id(), %error, "keep-alive send failed, stopping");
            break;
        }
        counter!(KEEP_ALIVE_SENT_TOTAL).increment(1);
    }

    if entries
        .remove_if(connection.id(), |_, entry| entry.seq == seq)
        .is_some()
    {
        gauge!(KEEP_ALIVE_ACTIVE).decrement(1.0);
    }
}
