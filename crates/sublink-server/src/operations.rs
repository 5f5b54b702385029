//! Per-session registry of running operations.
//!
//! Inbound `start`/`stop` frames and asynchronous stream completions race on
//! this map. Registration is insert-if-absent, and every handle carries a
//! sequence number so a late completion never removes a newer operation that
//! reused the same id.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sublink_core::ProtocolError;
use tokio_util::sync::CancellationToken;

struct OperationHandle {
    token: CancellationToken,
    seq: u64,
}

/// Returned by [`OperationRegistry::subscribe`]; owned by the running operation.
#[derive(Clone, Debug)]
pub struct OperationTicket {
    id: String,
    token: CancellationToken,
    seq: u64,
}

impl OperationTicket {
    /// Operation id as sent by the client.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancelled when the operation is stopped or the session closes.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Operation id → cancellable handle.
#[derive(Default)]
pub struct OperationRegistry {
    operations: DashMap<String, OperationHandle>,
    next_seq: AtomicU64,
}

impl OperationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new operation under `id`.
    ///
    /// Fails with [`ProtocolError::DuplicateOperation`] if `id` is already
    /// running; the existing operation is left untouched.
    pub fn subscribe(&self, id: &str) -> Result<OperationTicket, ProtocolError> {
        match self.operations.entry(id.to_string()) {
            Entry::Occupied(_) => Err(ProtocolError::DuplicateOperation(id.to_string())),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let _ = slot.insert(OperationHandle {
                    token: token.clone(),
                    seq,
                });
                Ok(OperationTicket {
                    id: id.to_string(),
                    token,
                    seq,
                })
            }
        }
    }

    /// Cancel and remove `id`. Returns `false` if nothing was registered.
    pub fn unsubscribe(&self, id: &str) -> bool {
        match self.operations.remove(id) {
            Some((_, handle)) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the operation a ticket belongs to, if it is still the one registered.
    pub fn complete(&self, ticket: &OperationTicket) -> bool {
        self.operations
            .remove_if(&ticket.id, |_, handle| handle.seq == ticket.seq)
            .is_some()
    }

    /// Whether the ticket's operation is still registered.
    pub fn is_current(&self, ticket: &OperationTicket) -> bool {
        self.operations
            .get(&ticket.id)
            .is_some_and(|handle| handle.seq == ticket.seq)
    }

    /// Whether any operation is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.operations.contains_key(id)
    }

    /// Cancel and remove every operation. Returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.operations.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.unsubscribe(id)).count()
    }

    /// Ids of running operations.
    pub fn ids(&self) -> Vec<String> {
        self.operations.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of running operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether no operation is running.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
