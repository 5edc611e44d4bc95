//! Inbound packets and the per-connection incoming stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::poll_fn;
use futures_util::Stream;
use tokio::sync::{mpsc, watch};

use crate::net::connection::ConnectionState;
use crate::protocol::connection::Shared;
use crate::protocol::envelope::{CorrelationId, Envelope};
use crate::protocol::error::ProtocolResult;
use crate::protocol::registry::Payload;

/// An unsolicited message, with the capability to reply to it.
pub struct Packet<P> {
    id: CorrelationId,
    payload: P,
    connection: Arc<Shared<P>>,
}

impl<P: Payload> Packet<P> {
    pub(crate) fn new(id: CorrelationId, payload: P, connection: Arc<Shared<P>>) -> Self {
        Self {
            id,
            payload,
            connection,
        }
    }

    /// Correlation id the sender attached.
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    /// Reply under this packet's correlation id.
    ///
    /// If the sender issued a query, the reply completes it; otherwise the
    /// peer receives it as an ordinary unsolicited packet.
    pub async fn response(&self, payload: P) -> ProtocolResult<()> {
        self.connection
            .send(Envelope::with_id(self.id, payload))
            .await
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for Packet<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .field("connection_id", &self.connection.id)
            .finish()
    }
}

/// Stream of unsolicited packets for one connection, in wire order.
///
/// Ends when teardown begins. Packets still buffered at that point are
/// discarded, never delivered.
pub struct Incoming<P> {
    rx: mpsc::Receiver<Packet<P>>,
    state: watch::Receiver<ConnectionState>,
}

impl<P> Incoming<P> {
    pub(crate) fn new(
        rx: mpsc::Receiver<Packet<P>>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self { rx, state }
    }

    /// Receive the next packet, or `None` once the connection is closing.
    pub async fn recv(&mut self) -> Option<Packet<P>> {
        poll_fn(|cx| self.poll_packet(cx)).await
    }

    fn poll_packet(&mut self, cx: &mut Context<'_>) -> Poll<Option<Packet<P>>> {
        if !self.state.borrow().is_open() {
            self.rx.close();
            while self.rx.try_recv().is_ok() {}
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl<P> Stream for Incoming<P> {
    type Item = Packet<P>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_packet(cx)
    }
}

impl<P> std::fmt::Debug for Incoming<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incoming").finish_non_exhaustive()
    }
}
