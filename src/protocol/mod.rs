//! Messaging core.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     bytes → codec.rs (length-delimited JSON envelopes, via registry.rs)
//!     → demux.rs (read loop)
//!         → correlation.rs (completes a pending query)
//!         → packet.rs (Incoming stream of unsolicited packets)
//!
//! Outbound:
//!     connection.rs request/query, packet.rs response
//!     → send lock → codec.rs → bytes
//! ```
//!
//! # Design Decisions
//! - Payloads are a closed enum resolved through an explicit registry
//! - Matching is by correlation id, never by send order
//! - Failures end one connection and never leak into others
//! - No retries, reconnection or prioritization in the core

pub mod codec;
pub mod connection;
pub mod correlation;
mod demux;
pub mod envelope;
pub mod error;
pub mod packet;
pub mod registry;

pub use codec::{EnvelopeCodec, DEFAULT_MAX_FRAME_LENGTH};
pub use connection::Connection;
pub use correlation::CorrelationTable;
pub use envelope::{CorrelationId, Envelope};
pub use error::{BoxError, ProtocolError, ProtocolResult, UnhandledPayload};
pub use packet::{Incoming, Packet};
pub use registry::{CodecRegistry, Payload, PayloadType};
