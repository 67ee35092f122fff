//! Inbound message delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{BusError, Result};
use crate::message::{Envelope, TypeKey};
use crate::router::Router;

/// Error type returned by message handlers.
///
/// Handlers box their own error types; callers may downcast to inspect them.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Whether a subscription handles commands or events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    Command,
    Event,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::Command => f.write_str("command"),
            MessageRole::Event => f.write_str("event"),
        }
    }
}

/// Per-delivery context handed to a handler.
///
/// Carries the inbound message, the cancellation token of the surrounding
/// processing flow, and an outbox for follow-up messages. The outbox is only
/// flushed when the handler succeeds.
#[derive(Debug)]
pub struct MessageContext {
    message: Envelope,
    cancel: CancellationToken,
    outbox: Mutex<Vec<Envelope>>,
}

impl MessageContext {
    /// Creates a context that is never cancelled.
    pub fn new(message: Envelope) -> Self {
        Self::with_cancellation(message, CancellationToken::new())
    }

    /// Creates a context bound to a cancellation token.
    pub fn with_cancellation(message: Envelope, cancel: CancellationToken) -> Self {
        Self {
            message,
            cancel,
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// Returns the inbound message.
    pub fn message(&self) -> &Envelope {
        &self.message
    }

    /// Returns the cancellation token for this delivery.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Queues a follow-up message.
    pub fn send(&self, envelope: Envelope) {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(envelope);
    }

    /// Drains the queued follow-up messages.
    pub fn take_outbox(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.outbox.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// A handler subscribed to one or more message kinds.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles a single delivery.
    async fn handle(&self, ctx: &MessageContext) -> std::result::Result<(), HandlerError>;
}

/// One entry of a subscription table.
#[derive(Clone)]
pub struct Subscription {
    pub kind: TypeKey,
    pub role: MessageRole,
    pub handler: Arc<dyn MessageHandler>,
}

impl Subscription {
    /// Creates a command subscription.
    pub fn command(kind: TypeKey, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            kind,
            role: MessageRole::Command,
            handler,
        }
    }

    /// Creates an event subscription.
    pub fn event(kind: TypeKey, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            kind,
            role: MessageRole::Event,
            handler,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Accepts subscription tables from components.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Installs a complete subscription table.
    ///
    /// Installation is atomic: either every subscription is installed or,
    /// on error, none is.
    async fn install(&self, subscriptions: Vec<Subscription>) -> Result<()>;
}

/// In-process dispatcher.
///
/// Delivers a message to the handler subscribed for its kind, then routes
/// the handler's outbox through the router. Each call to [`dispatch`] is an
/// independent processing flow; callers may run many concurrently.
///
/// [`dispatch`]: InMemoryDispatcher::dispatch
pub struct InMemoryDispatcher {
    subscriptions: RwLock<HashMap<TypeKey, Subscription>>,
    router: Arc<dyn Router>,
}

impl InMemoryDispatcher {
    /// Creates a dispatcher routing outbound messages through `router`.
    pub fn new(router: Arc<dyn Router>) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            router,
        }
    }

    /// Returns the installed subscriptions, sorted by kind.
    pub async fn subscriptions(&self) -> Vec<(TypeKey, MessageRole)> {
        let subs = self.subscriptions.read().await;
        let mut entries: Vec<_> = subs.values().map(|s| (s.kind.clone(), s.role)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Returns true if a handler is subscribed for `kind`.
    pub async fn is_subscribed(&self, kind: &TypeKey) -> bool {
        self.subscriptions.read().await.contains_key(kind)
    }

    /// Delivers a message with a fresh, never-cancelled token.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<()> {
        self.dispatch_with_cancellation(envelope, CancellationToken::new())
            .await
    }

    /// Delivers a message within a cancellable processing flow.
    #[tracing::instrument(skip(self, envelope, cancel), fields(kind = %envelope.kind, message_id = %envelope.id))]
    pub async fn dispatch_with_cancellation(
        &self,
        envelope: Envelope,
        cancel: CancellationToken,
    ) -> Result<()> {
        let subscription = self
            .subscriptions
            .read()
            .await
            .get(&envelope.kind)
            .cloned()
            .ok_or_else(|| BusError::NoHandler(envelope.kind.clone()))?;

        metrics::counter!("bus_messages_dispatched_total", "role" => subscription.role.to_string())
            .increment(1);

        let ctx = MessageContext::with_cancellation(envelope, cancel);
        subscription
            .handler
            .handle(&ctx)
            .await
            .map_err(|source| BusError::Handler {
                kind: subscription.kind.clone(),
                source,
            })?;

        for outbound in ctx.take_outbox() {
            self.route(outbound).await?;
        }

        Ok(())
    }

    async fn route(&self, envelope: Envelope) -> Result<()> {
        let endpoints = self.router.route(&envelope.kind).await;
        if endpoints.is_empty() {
            tracing::warn!(kind = %envelope.kind, "no endpoint registered, dropping outbound message");
            return Ok(());
        }
        for endpoint in endpoints {
            endpoint.send(&envelope).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for InMemoryDispatcher {
    async fn install(&self, subscriptions: Vec<Subscription>) -> Result<()> {
        let mut installed = self.subscriptions.write().await;

        let mut batch: HashMap<TypeKey, Subscription> = HashMap::new();
        for sub in subscriptions {
            if installed.contains_key(&sub.kind) || batch.contains_key(&sub.kind) {
                return Err(BusError::DuplicateSubscription(sub.kind));
            }
            batch.insert(sub.kind.clone(), sub);
        }

        tracing::debug!(count = batch.len(), "installing subscriptions");
        installed.extend(batch);
        Ok(())
    }
}
