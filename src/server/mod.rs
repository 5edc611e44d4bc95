//! Server: accept loop and per-session lifecycle.
//!
//! # Data Flow
//! ```text
//! Listener accept
//!     → Connection::from_tcp (read loop spawned)
//!     → Session registered in SessionRegistry
//!     → handler(session, incoming)
//!     → handler returns: unregister, close connection
//! ```
//!
//! # Design Decisions
//! - One task per session; a failing handler affects only its own session
//! - Accept errors stop the server instead of being retried
//! - Graceful stop: on shutdown signal, stop accepting and close all sessions

pub mod registry;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::{ConnectionConfig, ListenerConfig};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::protocol::{BoxError, CodecRegistry, Connection, Incoming, Payload};
use crate::session::Session;

pub use registry::{RegisteredSession, SessionRegistry};

/// Multi-session server over TCP.
pub struct Server<P> {
    listener: Listener,
    codecs: Arc<CodecRegistry<P>>,
    sessions: SessionRegistry<P>,
    connection_config: ConnectionConfig,
}

impl<P: Payload> Server<P> {
    /// Bind a listener; call [`serve`](Self::serve) to start accepting.
    pub async fn bind(
        listener_config: &ListenerConfig,
        connection_config: ConnectionConfig,
        codecs: Arc<CodecRegistry<P>>,
    ) -> Result<Self, ListenerError> {
        let listener = Listener::bind(listener_config).await?;
        Ok(Self {
            listener,
            codecs,
            sessions: SessionRegistry::new(),
            connection_config,
        })
    }

    /// Bind `address` with default settings and serve until an accept error.
    pub async fn listen_and_serve<H, Fut>(
        address: &str,
        codecs: Arc<CodecRegistry<P>>,
        handler: H,
    ) -> Result<(), ListenerError>
    where
        H: Fn(Session<P>, Incoming<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let listener_config = ListenerConfig {
            bind_address: address.to_string(),
            ..ListenerConfig::default()
        };
        let server = Self::bind(&listener_config, ConnectionConfig::default(), codecs).await?;
        server.serve(handler).await
    }

    /// Accept connections until an accept error, running `handler` once per session.
    pub async fn serve<H, Fut>(&self, handler: H) -> Result<(), ListenerError>
    where
        H: Fn(Session<P>, Incoming<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        loop {
            let (stream, peer_addr, permit) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed, server stopping");
                    return Err(e);
                }
            };
            self.spawn_session(stream, peer_addr, permit, Arc::clone(&handler));
        }
    }

    /// Like [`serve`](Self::serve), but stops when `shutdown` fires and then
    /// closes every active session.
    pub async fn serve_with_shutdown<H, Fut>(
        &self,
        handler: H,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError>
    where
        H: Fn(Session<P>, Incoming<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!(error = %e, "Accept failed, server stopping");
                            return Err(e);
                        }
                    };
                    self.spawn_session(stream, peer_addr, permit, Arc::clone(&handler));
                }
                _ = shutdown.recv() => {
                    tracing::info!(
                        active_sessions = self.sessions.len(),
                        "Shutdown signal received, closing sessions"
                    );
                    self.sessions.close_all().await;
                    return Ok(());
                }
            }
        }
    }

    fn spawn_session<H, Fut>(
        &self,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
        permit: ConnectionPermit,
        handler: Arc<H>,
    ) where
        H: Fn(Session<P>, Incoming<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let codecs = Arc::clone(&self.codecs);
        let sessions = self.sessions.clone();
        let config = self.connection_config.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let (connection, incoming) = match Connection::from_tcp(stream, codecs, &config) {
                Ok(opened) => opened,
                Err(e) => {
                    tracing::warn!(peer_addr = %peer_addr, error = %e, "Failed to set up connection");
                    return;
                }
            };

            let session = Session::new(connection);
            let registration = sessions.register(session.clone());
            tracing::info!(
                session_id = %session.id(),
                remote_addr = %peer_addr,
                "Session connected"
            );

            if let Err(e) = (*handler)(session.clone(), incoming).await {
                tracing::warn!(
                    session_id = %session.id(),
                    remote_addr = %peer_addr,
                    error = %e,
                    "Session handler failed"
                );
            }

            drop(registration);
            session.close().await;
            tracing::info!(
                session_id = %session.id(),
                remote_addr = %peer_addr,
                "Session disconnected"
            );
        });
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle on the active sessions; usable while the server is serving.
    pub fn sessions(&self) -> SessionRegistry<P> {
        self.sessions.clone()
    }
}
