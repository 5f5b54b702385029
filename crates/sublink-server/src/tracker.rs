//! Registry of live sessions, used for health reporting and shutdown.

use std::sync::Arc;

use dashmap::DashMap;
use sublink_core::ConnectionId;
use tracing::debug;

use crate::connection::Connection;
use crate::session::Session;

/// Live sessions keyed by connection id.
#[derive(Default)]
pub struct SessionTracker {
    sessions: DashMap<ConnectionId, Arc<Session>>,
}

impl SessionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session.
    pub fn add(&self, session: Arc<Session>) {
        let _ = self.sessions.insert(session.id().clone(), session);
    }

    /// Stop tracking a session. Returns it if it was tracked.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Number of tracked sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Operations running across every session.
    pub fn active_operations(&self) -> usize {
        self.sessions.iter().map(|entry| entry.operations().len()).sum()
    }

    /// Close every open connection. Each session then ends through its
    /// protocol handler. Returns how many connections were still open.
    pub fn disconnect_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        let mut disconnected = 0;
        for session in &sessions {
            let connection = session.connection();
            if connection.is_open() {
                connection.close();
                disconnected += 1;
            }
        }
        debug!(tracked = sessions.len(), disconnected, "disconnected all sessions");
        disconnected
    }
}
