//! Serialization shared by the wire and by stores.

use thiserror::Error;

use crate::message::{Envelope, TypeKey};

/// Errors raised while encoding or decoding messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The envelope carries a different message type than requested.
    #[error("Expected message of kind {expected}, got {actual}")]
    KindMismatch { expected: TypeKey, actual: TypeKey },
}

/// Encodes values to bytes and back.
///
/// Components that persist message-derived data (such as saga stores) are
/// handed the bus codec so stored payloads use the wire serialization.
pub trait MessageCodec: Send + Sync {
    /// Short codec name, e.g. `"json"`.
    fn name(&self) -> &'static str;

    /// Encodes a value.
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, CodecError>;

    /// Decodes a value.
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, CodecError>;

    /// Encodes a full envelope for transport.
    fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        self.encode(&serde_json::to_value(envelope)?)
    }

    /// Decodes an envelope received from transport.
    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        Ok(serde_json::from_value(self.decode(bytes)?)?)
    }
}

/// JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl MessageCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
