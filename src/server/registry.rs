//! Session registry: active sessions on a server.
//!
//! # Responsibilities
//! - Track sessions from accept until their handler returns
//! - Enumerate and look up sessions for management operations
//! - Broadcast a request to every active session
//!
//! # Design Decisions
//! - Sharded concurrent map; enumeration never blocks connect/disconnect
//!   for long
//! - Registration is tied to a guard, so a panicking handler still
//!   unregisters its session

use std::sync::Arc;

use dashmap::DashMap;

use crate::observability::metrics;
use crate::protocol::Payload;
use crate::session::{Session, SessionId};

/// Concurrent map of active sessions. Cheap to clone.
pub struct SessionRegistry<P> {
    sessions: Arc<DashMap<SessionId, Session<P>>>,
}

impl<P> Clone for SessionRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<P: Payload> SessionRegistry<P> {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Register a session. It stays registered until the guard drops.
    pub fn register(&self, session: Session<P>) -> RegisteredSession<P> {
        let id = session.id();
        self.sessions.insert(id, session);
        metrics::record_session_opened();
        RegisteredSession {
            registry: self.clone(),
            id,
        }
    }

    fn unregister(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            metrics::record_session_closed();
        }
        removed
    }

    pub fn get(&self, id: &SessionId) -> Option<Session<P>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of all active sessions.
    pub fn sessions(&self) -> Vec<Session<P>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Send `payload` as a request to every active session.
    ///
    /// Returns how many sessions accepted the write. Failures are logged
    /// and do not stop delivery to the others.
    pub async fn broadcast(&self, payload: P) -> usize
    where
        P: Clone,
    {
        let mut delivered = 0;
        for session in self.sessions() {
            match session.request(payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.id(),
                        remote_addr = %session.remote_addr(),
                        error = %e,
                        "Broadcast delivery failed"
                    );
                }
            }
        }
        delivered
    }

    /// Close every active session.
    pub async fn close_all(&self) {
        for session in self.sessions() {
            session.close().await;
        }
    }
}

impl<P: Payload> Default for SessionRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that keeps a session registered.
/// Unregisters it when dropped.
pub struct RegisteredSession<P: Payload> {
    registry: SessionRegistry<P>,
    id: SessionId,
}

impl<P: Payload> RegisteredSession<P> {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl<P: Payload> Drop for RegisteredSession<P> {
    fn drop(&mut self) {
        if self.registry.unregister(&self.id) {
            tracing::trace!(session_id = %self.id, "Session unregistered");
        }
    }
}
