//! Codec registry: payload type id → decode logic.
//!
//! # Responsibilities
//! - Map a stable type id to the concrete payload struct it decodes into
//! - Reject encoding of payloads whose type id was never registered
//! - Reject decoding of unknown type ids (terminal for the connection)
//!
//! # Design Decisions
//! - Explicit object passed to every connection, never process-global
//! - Populated at startup, then shared read-only behind an `Arc`
//! - Decoding yields the application's closed payload enum, so handlers
//!   pattern-match on variants instead of inspecting runtime types

use std::any::TypeId;
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::protocol::error::{ProtocolError, ProtocolResult};

/// A concrete message type carried on the wire.
pub trait PayloadType: Serialize + DeserializeOwned + Send + 'static {
    /// Stable identifier written in every envelope carrying this type.
    const TYPE_ID: &'static str;
}

/// The closed set of payload variants an application exchanges.
///
/// Usually an enum with one variant per [`PayloadType`].
pub trait Payload: Send + 'static {
    /// Type id of the variant held.
    fn payload_type(&self) -> &'static str;

    /// Serialize the variant's fields.
    fn to_fields(&self) -> Result<Value, serde_json::Error>;
}

type DecodeFn<P> = fn(Value) -> Result<P, serde_json::Error>;

struct Entry<P> {
    rust_type: TypeId,
    rust_name: &'static str,
    decode: DecodeFn<P>,
}

fn decode_as<T, P>(fields: Value) -> Result<P, serde_json::Error>
where
    T: PayloadType + Into<P>,
{
    serde_json::from_value::<T>(fields).map(Into::into)
}

/// Registry of payload types known to a set of connections.
pub struct CodecRegistry<P> {
    entries: HashMap<&'static str, Entry<P>>,
}

impl<P: Payload> CodecRegistry<P> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a payload type.
    ///
    /// Registering the same type twice is a no-op. A different type
    /// claiming an id already taken fails with `DuplicateTypeId`.
    pub fn register<T>(&mut self) -> ProtocolResult<()>
    where
        T: PayloadType + Into<P>,
    {
        let rust_type = TypeId::of::<T>();
        if let Some(existing) = self.entries.get(T::TYPE_ID) {
            if existing.rust_type == rust_type {
                return Ok(());
            }
            tracing::warn!(
                type_id = T::TYPE_ID,
                registered = existing.rust_name,
                rejected = std::any::type_name::<T>(),
                "Payload type id already claimed"
            );
            return Err(ProtocolError::DuplicateTypeId(T::TYPE_ID));
        }

        self.entries.insert(
            T::TYPE_ID,
            Entry {
                rust_type,
                rust_name: std::any::type_name::<T>(),
                decode: decode_as::<T, P>,
            },
        );
        tracing::debug!(type_id = T::TYPE_ID, "Payload type registered");
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<T>(mut self) -> ProtocolResult<Self>
    where
        T: PayloadType + Into<P>,
    {
        self.register::<T>()?;
        Ok(self)
    }

    /// Whether a type id is known.
    pub fn contains(&self, type_id: &str) -> bool {
        self.entries.contains_key(type_id)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split a payload into its type id and serialized fields.
    pub fn encode(&self, payload: &P) -> ProtocolResult<(&'static str, Value)> {
        let type_id = payload.payload_type();
        if !self.contains(type_id) {
            return Err(ProtocolError::Encode(format!(
                "payload type '{}' is not registered",
                type_id
            )));
        }
        let fields = payload
            .to_fields()
            .map_err(|e| ProtocolError::Encode(format!("{}: {}", type_id, e)))?;
        Ok((type_id, fields))
    }

    /// Rebuild a payload from its type id and fields.
    pub fn decode(&self, type_id: &str, fields: Value) -> ProtocolResult<P> {
        let entry = self
            .entries
            .get(type_id)
            .ok_or_else(|| ProtocolError::UnknownType(type_id.to_string()))?;
        (entry.decode)(fields).map_err(|e| ProtocolError::Decode(format!("{}: {}", type_id, e)))
    }

    /// Registered type ids, in no particular order.
    pub fn type_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

impl<P: Payload> Default for CodecRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> std::fmt::Debug for CodecRegistry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("types", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
