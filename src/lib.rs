//! Bidirectional async messaging for agents.
//!
//! Both ends of a TCP connection may issue fire-and-forget requests and
//! correlated queries at any time. A background read loop per connection
//! routes each inbound envelope either to the query awaiting it or to the
//! application's `Incoming` stream.

pub mod client;
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::{Client, ClientError};
pub use config::AgentConfig;
pub use lifecycle::Shutdown;
pub use protocol::{
    BoxError, CodecRegistry, Connection, CorrelationId, Incoming, Packet, Payload, PayloadType,
    ProtocolError, ProtocolResult, UnhandledPayload,
};
pub use server::{Server, SessionRegistry};
pub use session::{Session, SessionId};
