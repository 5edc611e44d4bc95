//! Client: dial once, run one handler.
//!
//! # Responsibilities
//! - Resolve the address (default port 12457) and dial with a timeout
//! - Build one connection and session
//! - Run the handler once, then close
//!
//! # Design Decisions
//! - No reconnection; retry policy belongs to the caller

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::{ClientConfig, ConnectionConfig};
use crate::net::address::{dial_address, AddressError};
use crate::protocol::{BoxError, CodecRegistry, Connection, Incoming, Payload};
use crate::session::Session;

/// Errors that can occur while running a client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Address string could not be resolved to host:port.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// TCP connection failed.
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// TCP connection did not complete in time.
    #[error("Connection to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// The application handler returned an error.
    #[error("Handler error: {0}")]
    Handler(BoxError),
}

/// Single-connection client.
pub struct Client<P> {
    address: String,
    codecs: Arc<CodecRegistry<P>>,
    config: ClientConfig,
    connection_config: ConnectionConfig,
}

impl<P: Payload> Client<P> {
    /// Client for `address` with default settings.
    pub fn new(address: impl Into<String>, codecs: Arc<CodecRegistry<P>>) -> Self {
        Self {
            address: address.into(),
            codecs,
            config: ClientConfig::default(),
            connection_config: ConnectionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig, connection_config: ConnectionConfig) -> Self {
        self.config = config;
        self.connection_config = connection_config;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn tcp_connect(&self) -> Result<TcpStream, ClientError> {
        let address = dial_address(&self.address)?;
        let timeout = self.config.connect_timeout();

        match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(ClientError::Connect { address, source }),
            Err(_) => Err(ClientError::ConnectTimeout { address, timeout }),
        }
    }

    /// Dial and return the session with its incoming stream.
    pub async fn connect(&self) -> Result<(Session<P>, Incoming<P>), ClientError> {
        let stream = self.tcp_connect().await?;
        let (connection, incoming) =
            Connection::from_tcp(stream, Arc::clone(&self.codecs), &self.connection_config)
                .map_err(|source| ClientError::Connect {
                    address: self.address.clone(),
                    source,
                })?;
        Ok((Session::new(connection), incoming))
    }

    /// Dial, run `handler` once, close. Returns the handler's error.
    pub async fn run<H, Fut>(&self, handler: H) -> Result<(), ClientError>
    where
        H: FnOnce(Session<P>, Incoming<P>) -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        let (session, incoming) = self.connect().await?;
        let remote_addr = session.remote_addr();
        tracing::info!(
            session_id = %session.id(),
            remote_addr = %remote_addr,
            "Connected"
        );

        let result = handler(session.clone(), incoming).await;
        if let Err(e) = &result {
            tracing::warn!(remote_addr = %remote_addr, error = %e, "Session handler failed");
        }

        session.close().await;
        tracing::info!(remote_addr = %remote_addr, "Disconnected");
        result.map_err(ClientError::Handler)
    }
}
