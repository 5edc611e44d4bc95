//! Correlation table: outstanding queries keyed by correlation id.
//!
//! # Responsibilities
//! - Insert a pending entry per query, rejecting duplicate ids
//! - Complete an entry exactly once, handing the reply to its waiter
//! - Cancel entries on deadline, caller drop, or connection teardown
//!
//! # Design Decisions
//! - Each entry is a `oneshot` sender: completion never blocks the read loop
//! - Completion removes the entry before delivering, so a second reply with
//!   the same id finds no match
//! - A reply whose waiter has already gone away is handed back to the caller
//!   and treated as unsolicited
//! - Once closed, the table refuses new registrations

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::protocol::envelope::CorrelationId;
use crate::protocol::error::{ProtocolError, ProtocolResult};

struct TableState<P> {
    pending: HashMap<CorrelationId, oneshot::Sender<P>>,
    closed: bool,
}

/// Per-connection map of pending queries.
pub struct CorrelationTable<P> {
    state: Mutex<TableState<P>>,
}

impl<P> CorrelationTable<P> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                pending: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a pending entry and return the slot its reply lands in.
    pub fn register(&self, id: CorrelationId) -> ProtocolResult<oneshot::Receiver<P>> {
        let mut state = self.lock();
        if state.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        if state.pending.contains_key(&id) {
            return Err(ProtocolError::DuplicateCorrelationId(id));
        }
        let (tx, rx) = oneshot::channel();
        state.pending.insert(id, tx);
        Ok(rx)
    }

    /// Remove and fulfil the entry for `id`.
    ///
    /// Returns the payload back when nothing was waiting for it, either
    /// because no entry exists or because its waiter was dropped.
    pub fn complete(&self, id: &CorrelationId, payload: P) -> Result<(), P> {
        let sender = self.lock().pending.remove(id);
        match sender {
            Some(tx) => tx.send(payload),
            None => Err(payload),
        }
    }

    /// Remove an entry without fulfilling it. The waiter observes a closed slot.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        self.lock().pending.remove(id).is_some()
    }

    /// Cancel every entry and refuse further registrations.
    /// Returns the number of entries canceled.
    pub fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.drain().collect()
        };
        drained.len()
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.lock().pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl<P> Default for CorrelationTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels a table entry when dropped.
///
/// Held by a pending query so that a deadline, an early return or a dropped
/// future never leaves a stale entry behind.
pub(crate) struct PendingGuard<'a, P> {
    table: &'a CorrelationTable<P>,
    id: CorrelationId,
}

impl<'a, P> PendingGuard<'a, P> {
    pub(crate) fn new(table: &'a CorrelationTable<P>, id: CorrelationId) -> Self {
        Self { table, id }
    }
}

impl<P> Drop for PendingGuard<'_, P> {
    fn drop(&mut self) {
        if self.table.cancel(&self.id) {
            tracing::trace!(correlation_id = %self.id, "Pending query canceled");
        }
    }
}
