//! Envelope: the unit of wire transmission.
//!
//! # Wire Shape
//! ```text
//! {"id": "6f1c...", "payload": {"type": "ping", "fields": {...}}}
//! ```
//!
//! The correlation id is reused by a reply to mark it as the answer to a
//! specific query. Requests also carry a fresh id so they can never collide
//! with an outstanding query.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier linking a query to its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new random (v4) correlation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CorrelationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A correlation id plus a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<P> {
    pub id: CorrelationId,
    pub payload: P,
}

impl<P> Envelope<P> {
    /// Wrap a payload with a freshly generated correlation id.
    pub fn new(payload: P) -> Self {
        Self {
            id: CorrelationId::new(),
            payload,
        }
    }

    /// Wrap a payload under an existing correlation id (replies).
    pub fn with_id(id: CorrelationId, payload: P) -> Self {
        Self { id, payload }
    }
}

/// Serialized form of an envelope.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireEnvelope {
    pub id: CorrelationId,
    pub payload: WirePayload,
}

/// Serialized form of a payload: a type id and its fields.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WirePayload {
    #[serde(rename = "type")]
    pub type_id: String,
    #[serde(default)]
    pub fields: serde_json::Value,
}
