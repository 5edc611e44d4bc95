//! Session: application-facing identity wrapper around one connection.

use std::net::SocketAddr;
use std::time::Duration;

use uuid::Uuid;

use crate::net::connection::ConnectionState;
use crate::protocol::{Connection, Payload, ProtocolError, ProtocolResult};

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One connected peer, as seen by application handlers.
///
/// Cloning is cheap; clones share the same connection and may issue
/// requests and queries concurrently.
pub struct Session<P> {
    id: SessionId,
    connection: Connection<P>,
}

impl<P> Clone for Session<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            connection: self.connection.clone(),
        }
    }
}

impl<P: Payload> Session<P> {
    pub fn new(connection: Connection<P>) -> Self {
        Self {
            id: SessionId::new(),
            connection,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.connection.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_addr()
    }

    /// Round-trip time of the most recently answered query.
    pub fn latency(&self) -> Duration {
        self.connection.latency()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Fire-and-forget send.
    pub async fn request(&self, payload: P) -> ProtocolResult<()> {
        self.connection.request(payload).await
    }

    /// Send and wait for the correlated reply.
    pub async fn query(&self, payload: P) -> ProtocolResult<P> {
        self.connection.query(payload).await
    }

    /// Query with an explicit deadline.
    pub async fn query_timeout(&self, payload: P, deadline: Duration) -> ProtocolResult<P> {
        self.connection.query_timeout(payload, deadline).await
    }

    /// Query and hand the reply to `on_result`.
    pub async fn query_with<F, T, E>(&self, payload: P, on_result: F) -> Result<T, E>
    where
        F: FnOnce(P) -> Result<T, E>,
        E: From<ProtocolError>,
    {
        self.connection.query_with(payload, on_result).await
    }

    pub async fn close(&self) {
        self.connection.close().await
    }

    pub fn connection(&self) -> &Connection<P> {
        &self.connection
    }
}

impl<P> std::fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .finish()
    }
}
