//! Envelope framing.
//!
//! # Frame Format
//! ```text
//! +--------+--------+--------+--------+-----------------------------+
//! | Length (4 bytes, big-endian)      | JSON envelope (Length bytes)|
//! +--------+--------+--------+--------+-----------------------------+
//! ```
//!
//! # Design Decisions
//! - Length prefix makes frame boundaries exact, independent of payload content
//! - Encode and decode share one registry, so unknown type ids are rejected
//!   on both sides deterministically
//! - Oversized frames are refused before any byte is written

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::protocol::envelope::{Envelope, WireEnvelope, WirePayload};
use crate::protocol::error::{ProtocolError, ProtocolResult};
use crate::protocol::registry::{CodecRegistry, Payload};

/// Default maximum frame length (8 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Length-delimited JSON codec for [`Envelope`]s.
pub struct EnvelopeCodec<P> {
    frames: LengthDelimitedCodec,
    registry: Arc<CodecRegistry<P>>,
    max_frame_length: usize,
}

impl<P: Payload> EnvelopeCodec<P> {
    /// Create a codec resolving payloads through `registry`.
    pub fn new(registry: Arc<CodecRegistry<P>>, max_frame_length: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .max_frame_length(max_frame_length)
            .new_codec();
        Self {
            frames,
            registry,
            max_frame_length,
        }
    }

    /// Serialize an envelope body (without the length prefix).
    pub fn encode_body(&self, envelope: &Envelope<P>) -> ProtocolResult<Bytes> {
        let (type_id, fields) = self.registry.encode(&envelope.payload)?;
        let wire = WireEnvelope {
            id: envelope.id,
            payload: WirePayload {
                type_id: type_id.to_string(),
                fields,
            },
        };
        let body = serde_json::to_vec(&wire).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        if body.len() > self.max_frame_length {
            return Err(ProtocolError::FrameTooLarge {
                len: body.len(),
                max: self.max_frame_length,
            });
        }
        Ok(Bytes::from(body))
    }

    /// Parse an envelope body (without the length prefix).
    pub fn decode_body(&self, body: &[u8]) -> ProtocolResult<Envelope<P>> {
        let wire: WireEnvelope =
            serde_json::from_slice(body).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        let payload = self
            .registry
            .decode(&wire.payload.type_id, wire.payload.fields)?;
        Ok(Envelope::with_id(wire.id, payload))
    }
}

fn frame_error(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::InvalidData {
        ProtocolError::Decode(e.to_string())
    } else {
        ProtocolError::Io(e)
    }
}

impl<P: Payload> Decoder for EnvelopeCodec<P> {
    type Item = Envelope<P>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src).map_err(frame_error)? {
            Some(frame) => self.decode_body(&frame).map(Some),
            None => Ok(None),
        }
    }
}

impl<P: Payload> Encoder<Envelope<P>> for EnvelopeCodec<P> {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope<P>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = self.encode_body(&item)?;
        self.frames.encode(body, dst).map_err(frame_error)
    }
}
