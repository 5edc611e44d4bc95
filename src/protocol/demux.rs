//! Demultiplexer: the per-connection read loop.
//!
//! # Data Flow
//! ```text
//! bytes → EnvelopeCodec → envelope
//!     ├─ id matches a pending query → oneshot hand-off to the waiting caller
//!     └─ no match                   → Packet on the Incoming channel
//! ```
//!
//! # Backpressure
//! Delivery to `Incoming` waits until the application has room for the
//! packet. This is the only flow control: an application that stops
//! draining `Incoming` stops all decoding on the connection, including
//! replies to its own queries. A task that awaits a query while it is also
//! the only consumer of `Incoming` can therefore deadlock itself.
//!
//! # Termination
//! EOF, an I/O error, a malformed frame or an unknown payload type ends the
//! loop. Teardown then cancels every pending query, closes `Incoming` and
//! shuts down the write half.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use crate::net::connection::ConnectionState;
use crate::observability::metrics;
use crate::protocol::codec::EnvelopeCodec;
use crate::protocol::connection::{closing, BoxedReader, Shared};
use crate::protocol::envelope::Envelope;
use crate::protocol::error::ProtocolError;
use crate::protocol::packet::Packet;
use crate::protocol::registry::Payload;

enum Exit {
    /// Peer closed the stream.
    Eof,
    /// Teardown requested locally.
    Closed,
    /// Frame could not be read or parsed.
    Failed(ProtocolError),
}

pub(crate) async fn run_read_loop<P: Payload>(
    shared: Arc<Shared<P>>,
    mut reader: FramedRead<BoxedReader, EnvelopeCodec<P>>,
    incoming: mpsc::Sender<Packet<P>>,
) {
    let mut state = shared.state.subscribe();

    let exit = loop {
        let frame = tokio::select! {
            _ = closing(&mut state) => break Exit::Closed,
            frame = reader.next() => frame,
        };

        let Envelope { id, payload } = match frame {
            Some(Ok(envelope)) => envelope,
            Some(Err(e)) => break Exit::Failed(e),
            None => break Exit::Eof,
        };
        let payload_type = payload.payload_type();

        let payload = match shared.table.complete(&id, payload) {
            Ok(()) => {
                metrics::record_envelope_received("reply");
                tracing::trace!(
                    connection_id = %shared.id,
                    correlation_id = %id,
                    payload_type,
                    "Reply routed to pending query"
                );
                continue;
            }
            Err(payload) => payload,
        };

        metrics::record_envelope_received("incoming");
        tracing::trace!(
            connection_id = %shared.id,
            correlation_id = %id,
            payload_type,
            "Unsolicited packet"
        );

        let packet = Packet::new(id, payload, Arc::clone(&shared));
        tokio::select! {
            _ = closing(&mut state) => break Exit::Closed,
            sent = incoming.send(packet) => {
                if sent.is_err() {
                    tracing::warn!(
                        connection_id = %shared.id,
                        correlation_id = %id,
                        payload_type,
                        "Incoming stream dropped, discarding packet"
                    );
                }
            }
        }
    };

    match &exit {
        Exit::Eof => {
            tracing::debug!(connection_id = %shared.id, "Peer closed the stream");
        }
        Exit::Closed => {
            tracing::debug!(connection_id = %shared.id, "Read loop stopped by close");
        }
        Exit::Failed(e) => {
            metrics::record_read_failure();
            tracing::warn!(
                connection_id = %shared.id,
                remote_addr = %shared.remote_addr,
                error = %e,
                "Read loop terminated"
            );
        }
    }

    shared.begin_close();
    let canceled = shared.table.close();
    drop(incoming);
    drop(reader);
    shared.shutdown_writer().await;
    shared.state.send_replace(ConnectionState::Closed);

    tracing::debug!(
        connection_id = %shared.id,
        canceled_queries = canceled,
        "Connection closed"
    );
}
