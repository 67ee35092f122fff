use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::MessageId;
use crate::codec::CodecError;

/// Identifier of a message type as known to the scheme registry.
///
/// Keys are namespaced by convention, e.g. `"saga.StartSagaCommand"` or
/// `"orders.OrderPaid"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeKey(Cow<'static, str>);

impl TypeKey {
    /// Creates a key from a static string without allocating.
    pub const fn from_static(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    /// Creates a key from any string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(Cow::Owned(key.into()))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for TypeKey {
    fn from(key: &'static str) -> Self {
        Self::from_static(key)
    }
}

/// A typed message that can travel over the bus.
///
/// The `KIND` constant is the type key the message is registered under in
/// the scheme registry and subscribed under in the dispatcher.
pub trait Contract: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The type key of this contract.
    const KIND: &'static str;

    /// Returns the type key of this contract.
    fn type_key() -> TypeKey {
        TypeKey::from_static(Self::KIND)
    }
}

/// A message together with its routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique identifier for this message.
    pub id: MessageId,

    /// The message type.
    pub kind: TypeKey,

    /// Transport headers (e.g. `saga-id`).
    pub headers: HashMap<String, String>,

    /// When the message was created.
    pub timestamp: DateTime<Utc>,

    /// The message payload.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Creates a new envelope builder.
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::default()
    }

    /// Wraps a typed contract into an envelope.
    pub fn from_contract<T: Contract>(message: &T) -> Result<Self, CodecError> {
        Ok(Self::builder()
            .kind(T::type_key())
            .payload(message)?
            .build())
    }

    /// Decodes the payload into a typed contract.
    ///
    /// Fails if the envelope kind does not match the contract.
    pub fn decode<T: Contract>(&self) -> Result<T, CodecError> {
        if self.kind.as_str() != T::KIND {
            return Err(CodecError::KindMismatch {
                expected: T::type_key(),
                actual: self.kind.clone(),
            });
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Returns a header value, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Sets a header, returning the envelope.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Builder for constructing envelopes.
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    id: Option<MessageId>,
    kind: Option<TypeKey>,
    headers: HashMap<String, String>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
}

impl EnvelopeBuilder {
    /// Sets the message ID. If not set, a new ID will be generated.
    pub fn id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the message kind.
    pub fn kind(mut self, kind: impl Into<TypeKey>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, CodecError> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the envelope.
    ///
    /// # Panics
    ///
    /// Panics if the kind is not set. A missing payload becomes `null`.
    pub fn build(self) -> Envelope {
        Envelope {
            id: self.id.unwrap_or_default(),
            kind: self.kind.expect("kind is required"),
            headers: self.headers,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.unwrap_or(serde_json::Value::Null),
        }
    }

    /// Tries to build the envelope, returning None if the kind is missing.
    pub fn try_build(self) -> Option<Envelope> {
        Some(Envelope {
            id: self.id.unwrap_or_default(),
            kind: self.kind?,
            headers: self.headers,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.unwrap_or(serde_json::Value::Null),
        })
    }
}
