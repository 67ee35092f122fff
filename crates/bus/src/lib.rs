//! Message bus layer consumed by the saga component.
//!
//! This crate provides the narrow contracts the saga layer needs from a
//! message bus, together with in-process reference implementations:
//! - `Envelope` and the `Contract` trait for typed messages
//! - `MessageCodec` for wire/storage serialization
//! - `SchemeRegistry` for resolving type keys at boot
//! - `Dispatcher`, `Router` and `Endpoint` for delivery and routing
//! - `MessageBus`, the bundle of handles passed to components at boot

pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod router;
pub mod scheme;

use std::sync::Arc;

pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use common::MessageId;
pub use dispatcher::{
    Dispatcher, HandlerError, InMemoryDispatcher, MessageContext, MessageHandler, MessageRole,
    Subscription,
};
pub use error::{BusError, Result};
pub use message::{Contract, Envelope, EnvelopeBuilder, TypeKey};
pub use router::{Endpoint, InMemoryEndpoint, InMemoryRouter, Router};
pub use scheme::{KnownTypesRegistry, SchemeError, SchemeRegistry, TypeDescriptor};

/// Handles to the bus collaborators a component needs during boot.
///
/// Every collaborator is injected explicitly; nothing is looked up from
/// ambient global state.
#[derive(Clone)]
pub struct MessageBus {
    codec: Arc<dyn MessageCodec>,
    dispatcher: Arc<dyn Dispatcher>,
    router: Arc<dyn Router>,
    scheme: Arc<dyn SchemeRegistry>,
}

impl MessageBus {
    /// Bundles the bus collaborators.
    pub fn new(
        codec: Arc<dyn MessageCodec>,
        dispatcher: Arc<dyn Dispatcher>,
        router: Arc<dyn Router>,
        scheme: Arc<dyn SchemeRegistry>,
    ) -> Self {
        Self {
            codec,
            dispatcher,
            router,
            scheme,
        }
    }

    /// Returns the codec used for wire payloads.
    pub fn codec(&self) -> Arc<dyn MessageCodec> {
        self.codec.clone()
    }

    /// Returns the dispatcher that delivers inbound messages.
    pub fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        self.dispatcher.clone()
    }

    /// Returns the router that maps outbound contracts to endpoints.
    pub fn router(&self) -> Arc<dyn Router> {
        self.router.clone()
    }

    /// Returns the scheme registry of known message types.
    pub fn scheme(&self) -> Arc<dyn SchemeRegistry> {
        self.scheme.clone()
    }
}
