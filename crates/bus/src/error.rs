//! Bus error types.

use thiserror::Error;

use crate::codec::CodecError;
use crate::message::TypeKey;

/// Errors raised by the dispatcher, router and endpoints.
#[derive(Debug, Error)]
pub enum BusError {
    /// No handler is subscribed for the message kind.
    #[error("No handler subscribed for {0}")]
    NoHandler(TypeKey),

    /// A subscription for this kind and role already exists.
    #[error("Duplicate subscription for {0}")]
    DuplicateSubscription(TypeKey),

    /// A subscribed handler rejected the message.
    #[error("Handler for {kind} failed: {source}")]
    Handler {
        kind: TypeKey,
        #[source]
        source: crate::dispatcher::HandlerError,
    },

    /// An endpoint failed to accept an outbound message.
    #[error("Endpoint '{endpoint}' failed to send {kind}: {reason}")]
    Send {
        endpoint: String,
        kind: TypeKey,
        reason: String,
    },

    /// Encoding or decoding failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
