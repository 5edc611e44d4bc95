//! Connection core: request/query API over one duplex stream.
//!
//! # Responsibilities
//! - Own the stream halves, the correlation table and the outbound write path
//! - Spawn the read loop (see `demux`) and hand its inbound stream to the caller
//! - `request`: fire-and-forget send
//! - `query`: send, then suspend until the correlated reply or teardown
//! - Track lifecycle state and the last measured query latency
//!
//! # Design Decisions
//! - One send lock per connection around encode + write; frames from
//!   concurrent senders never interleave
//! - Query entries are registered before the envelope is written, so a
//!   fast reply can never race past its own registration
//! - A pending query removes its own table entry on deadline or drop
//! - Any I/O failure, on read or write, is terminal for this connection only
//! - Teardown abandons an in-flight write; senders see `ConnectionClosed`

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::ConnectionConfig;
use crate::net::connection::{ConnectionId, ConnectionState};
use crate::observability::metrics;
use crate::protocol::codec::EnvelopeCodec;
use crate::protocol::correlation::{CorrelationTable, PendingGuard};
use crate::protocol::demux;
use crate::protocol::envelope::{CorrelationId, Envelope};
use crate::protocol::error::{ProtocolError, ProtocolResult};
use crate::protocol::packet::Incoming;
use crate::protocol::registry::{CodecRegistry, Payload};

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound on flushing and shutting down the write half during teardown.
const WRITE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves once the connection leaves `Connected`.
pub(crate) async fn closing(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state.wait_for(|s| !s.is_open()).await;
}

/// State shared by every handle on one connection and by its read loop.
pub(crate) struct Shared<P> {
    pub(crate) id: ConnectionId,
    pub(crate) local_addr: SocketAddr,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) table: CorrelationTable<P>,
    pub(crate) state: watch::Sender<ConnectionState>,
    writer: Mutex<FramedWrite<BoxedWriter, EnvelopeCodec<P>>>,
    latency_nanos: AtomicU64,
    query_timeout: Option<Duration>,
}

impl<P: Payload> Shared<P> {
    pub(crate) fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn ensure_open(&self) -> ProtocolResult<()> {
        if self.current_state().is_open() {
            Ok(())
        } else {
            Err(ProtocolError::ConnectionClosed)
        }
    }

    /// Move Connected → Closing. Returns false if teardown had already begun.
    pub(crate) fn begin_close(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_open() {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        })
    }

    /// Encode and write one envelope under the send lock.
    ///
    /// Gives up with `ConnectionClosed` as soon as teardown begins, even
    /// while waiting for the lock or for a peer that stopped reading.
    pub(crate) async fn send(&self, envelope: Envelope<P>) -> ProtocolResult<()> {
        self.ensure_open()?;
        let correlation_id = envelope.id;
        let payload_type = envelope.payload.payload_type();

        let mut state = self.state.subscribe();
        let write = async {
            let mut writer = self.writer.lock().await;
            self.ensure_open()?;
            writer.send(envelope).await
        };
        let result = tokio::select! {
            _ = closing(&mut state) => Err(ProtocolError::ConnectionClosed),
            result = write => result,
        };

        match result {
            Ok(()) => {
                tracing::trace!(
                    connection_id = %self.id,
                    correlation_id = %correlation_id,
                    payload_type,
                    "Envelope sent"
                );
                metrics::record_envelope_sent(payload_type);
                Ok(())
            }
            Err(ProtocolError::ConnectionClosed) => Err(ProtocolError::ConnectionClosed),
            Err(e) => {
                if e.is_terminal() {
                    tracing::warn!(
                        connection_id = %self.id,
                        error = %e,
                        "Write failed, closing connection"
                    );
                    self.begin_close();
                }
                Err(e)
            }
        }
    }

    async fn query(&self, payload: P) -> ProtocolResult<P> {
        self.ensure_open()?;
        let id = CorrelationId::new();
        let slot = self.table.register(id)?;
        let _guard = PendingGuard::new(&self.table, id);

        let started = Instant::now();
        self.send(Envelope::with_id(id, payload)).await?;

        let reply = match slot.await {
            Ok(reply) => reply,
            Err(_) => {
                metrics::record_query_failure("connection_closed");
                return Err(ProtocolError::ConnectionClosed);
            }
        };

        let latency = started.elapsed();
        self.latency_nanos.store(
            u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        metrics::record_query_latency(latency);
        tracing::trace!(
            connection_id = %self.id,
            correlation_id = %id,
            latency = ?latency,
            "Query answered"
        );
        Ok(reply)
    }

    /// Shut down the write half.
    ///
    /// Every completed send has already flushed its frame; bytes left in the
    /// buffer belong to a write abandoned by teardown and are discarded.
    pub(crate) async fn shutdown_writer(&self) {
        let shutdown = async {
            let mut writer = self.writer.lock().await;
            writer.get_mut().shutdown().await
        };
        match tokio::time::timeout(WRITE_SHUTDOWN_TIMEOUT, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Stream shutdown failed");
            }
            Err(_) => {
                tracing::warn!(connection_id = %self.id, "Timed out shutting down stream");
            }
        }
    }
}

/// Handle on one connection. Cheap to clone; all clones drive the same core.
pub struct Connection<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for Connection<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: Payload> Connection<P> {
    /// Start a connection over any duplex byte stream.
    ///
    /// Spawns the read loop on the current Tokio runtime and returns the
    /// connection handle together with its inbound packet stream.
    pub fn open<S>(
        stream: S,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        registry: Arc<CodecRegistry<P>>,
        config: &ConnectionConfig,
    ) -> (Self, Incoming<P>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_halves(
            Box::new(reader),
            Box::new(writer),
            local_addr,
            remote_addr,
            registry,
            config,
        )
    }

    /// Start a connection over an established TCP stream.
    pub fn from_tcp(
        stream: TcpStream,
        registry: Arc<CodecRegistry<P>>,
        config: &ConnectionConfig,
    ) -> std::io::Result<(Self, Incoming<P>)> {
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %remote_addr, error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        Ok(Self::from_halves(
            Box::new(reader),
            Box::new(writer),
            local_addr,
            remote_addr,
            registry,
            config,
        ))
    }

    fn from_halves(
        reader: BoxedReader,
        writer: BoxedWriter,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        registry: Arc<CodecRegistry<P>>,
        config: &ConnectionConfig,
    ) -> (Self, Incoming<P>) {
        let id = ConnectionId::new();
        let (state, _) = watch::channel(ConnectionState::Connected);
        let writer = FramedWrite::new(
            writer,
            EnvelopeCodec::new(Arc::clone(&registry), config.max_frame_length),
        );
        let reader = FramedRead::new(reader, EnvelopeCodec::new(registry, config.max_frame_length));

        let shared = Arc::new(Shared {
            id,
            local_addr,
            remote_addr,
            table: CorrelationTable::new(),
            state,
            writer: Mutex::new(writer),
            latency_nanos: AtomicU64::new(0),
            query_timeout: config.query_timeout(),
        });

        // mpsc capacity must be non-zero.
        let (incoming_tx, incoming_rx) = mpsc::channel(config.incoming_buffer.max(1));
        tokio::spawn(demux::run_read_loop(Arc::clone(&shared), reader, incoming_tx));

        tracing::debug!(
            connection_id = %id,
            local_addr = %local_addr,
            remote_addr = %remote_addr,
            "Connection opened"
        );

        let incoming = Incoming::new(incoming_rx, shared.state.subscribe());
        (Self { shared }, incoming)
    }

    /// Send a fire-and-forget message. Returns once the frame is written.
    ///
    /// No correlation entry is created; the envelope still carries a fresh
    /// id so it cannot collide with an outstanding query.
    pub async fn request(&self, payload: P) -> ProtocolResult<()> {
        self.shared.send(Envelope::new(payload)).await
    }

    /// Send a message and wait for its correlated reply.
    ///
    /// Waits until the reply arrives or the connection closes, bounded by
    /// the configured default deadline if any. While waiting, the read loop
    /// must keep running: if the application stops draining `Incoming`, the
    /// read loop blocks on delivery and the reply is never decoded. Do not
    /// await a query on the same task that is expected to drain `Incoming`.
    pub async fn query(&self, payload: P) -> ProtocolResult<P> {
        match self.shared.query_timeout {
            Some(deadline) => self.query_timeout(payload, deadline).await,
            None => self.shared.query(payload).await,
        }
    }

    /// Like [`query`](Self::query) with an explicit deadline.
    ///
    /// On expiry the table entry is removed; a late reply is then routed to
    /// `Incoming` as an unsolicited packet.
    pub async fn query_timeout(&self, payload: P, deadline: Duration) -> ProtocolResult<P> {
        match tokio::time::timeout(deadline, self.shared.query(payload)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    connection_id = %self.shared.id,
                    deadline = ?deadline,
                    "Query deadline elapsed"
                );
                metrics::record_query_failure("timeout");
                Err(ProtocolError::QueryTimeout(deadline))
            }
        }
    }

    /// Query, then hand the reply to `on_result`, propagating its error.
    ///
    /// `on_result` is not invoked if the query fails.
    pub async fn query_with<F, T, E>(&self, payload: P, on_result: F) -> Result<T, E>
    where
        F: FnOnce(P) -> Result<T, E>,
        E: From<ProtocolError>,
    {
        let reply = self.query(payload).await?;
        on_result(reply)
    }

    /// Begin teardown and wait until the connection is closed.
    pub async fn close(&self) {
        if self.shared.begin_close() {
            tracing::debug!(connection_id = %self.shared.id, "Close requested");
        }
        self.closed().await;
    }

    /// Wait until the connection reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state
            .wait_for(|s| *s == ConnectionState::Closed)
            .await;
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    /// Round-trip time of the most recently answered query.
    pub fn latency(&self) -> Duration {
        Duration::from_nanos(self.shared.latency_nanos.load(Ordering::Relaxed))
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    pub fn is_closed(&self) -> bool {
        !self.state().is_open()
    }

    /// Number of queries waiting for a reply.
    pub fn pending_queries(&self) -> usize {
        self.shared.table.len()
    }
}

impl<P> std::fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("remote_addr", &self.shared.remote_addr)
            .field("state", &*self.shared.state.borrow())
            .finish()
    }
}
