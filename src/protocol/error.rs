//! Protocol error taxonomy.

use std::time::Duration;
use thiserror::Error;

use crate::protocol::envelope::CorrelationId;

/// Boxed error returned by application handlers and result callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the messaging core.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload could not be serialized, or its type id is not registered.
    #[error("Encode error: {0}")]
    Encode(String),

    /// The stream produced a frame that could not be parsed.
    /// Terminal for the connection that produced it.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A frame named a payload type the registry does not know.
    #[error("Unknown payload type '{0}'")]
    UnknownType(String),

    /// An outbound frame exceeded the configured maximum length.
    /// Nothing was written, so the connection stays usable.
    #[error("Frame of {len} bytes exceeds maximum {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// The connection is closing or closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A correlation id was registered while already outstanding.
    #[error("Duplicate correlation id {0}")]
    DuplicateCorrelationId(CorrelationId),

    /// Two different payload types claimed the same type id.
    #[error("Payload type id '{0}' is already registered to another type")]
    DuplicateTypeId(&'static str),

    /// A query deadline elapsed before its reply arrived.
    #[error("Query timed out after {0:?}")]
    QueryTimeout(Duration),

    /// Underlying transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error ends the connection's read loop.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Decode(_)
                | ProtocolError::UnknownType(_)
                | ProtocolError::Io(_)
                | ProtocolError::ConnectionClosed
        )
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Raised by application handlers on a payload variant they do not expect.
#[derive(Debug, Error)]
#[error("Unhandled payload type '{type_id}'")]
pub struct UnhandledPayload {
    pub type_id: &'static str,
}

impl UnhandledPayload {
    pub fn new(type_id: &'static str) -> Self {
        Self { type_id }
    }
}
