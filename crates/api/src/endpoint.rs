//! In-process endpoint that loops outbound saga messages back to the
//! local dispatcher.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bus::{Endpoint, Envelope, InMemoryDispatcher};

/// Delivers outbound messages to local subscribers.
///
/// Messages nobody in this process subscribes to (e.g. `SagaCompletedEvent`
/// with no listening saga) are logged and dropped. Each looped message is a
/// delivery of its own: a failing local handler is logged and counted, and
/// never fails the flow that sent the message. Holds the dispatcher weakly:
/// the dispatcher owns the router, which owns this endpoint.
pub struct LoopbackEndpoint {
    name: String,
    dispatcher: Weak<InMemoryDispatcher>,
}

impl LoopbackEndpoint {
    pub fn new(name: impl Into<String>, dispatcher: &Arc<InMemoryDispatcher>) -> Self {
        Self {
            name: name.into(),
            dispatcher: Arc::downgrade(dispatcher),
        }
    }
}

#[async_trait]
impl Endpoint for LoopbackEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, envelope: &Envelope) -> bus::Result<()> {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            tracing::warn!(kind = %envelope.kind, "dispatcher gone, dropping message");
            return Ok(());
        };

        if !dispatcher.is_subscribed(&envelope.kind).await {
            tracing::info!(
                kind = %envelope.kind,
                message_id = %envelope.id,
                payload = %envelope.payload,
                "outbound message has no local subscriber"
            );
            return Ok(());
        }

        if let Err(err) = dispatcher.dispatch(envelope.clone()).await {
            tracing::error!(
                kind = %envelope.kind,
                message_id = %envelope.id,
                error = %err,
                "local delivery failed"
            );
            metrics::counter!("loopback_delivery_failures_total", "kind" => envelope.kind.to_string())
                .increment(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::{
        Contract, Dispatcher, HandlerError, InMemoryRouter, MessageContext, MessageHandler,
        Subscription,
    };
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Pinged;

    impl Contract for Pinged {
        const KIND: &'static str = "test.Pinged";
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Unheard;

    impl Contract for Unheard {
        const KIND: &'static str = "test.Unheard";
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl MessageHandler for Counting {
        async fn handle(&self, _ctx: &MessageContext) -> Result<(), HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_subscribed_and_drops_unknown() {
        let dispatcher = Arc::new(InMemoryDispatcher::new(Arc::new(InMemoryRouter::new())));
        let handler = Arc::new(Counting::default());
        dispatcher
            .install(vec![Subscription::event(Pinged::type_key(), handler.clone())])
            .await
            .unwrap();
        let endpoint = LoopbackEndpoint::new("local", &dispatcher);

        endpoint
            .send(&Envelope::from_contract(&Pinged).unwrap())
            .await
            .unwrap();
        endpoint
            .send(&Envelope::from_contract(&Unheard).unwrap())
            .await
            .unwrap();

        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.name(), "local");
    }

    struct Failing;

    #[async_trait]
    impl MessageHandler for Failing {
        async fn handle(&self, _ctx: &MessageContext) -> Result<(), HandlerError> {
            Err("parent rejected notification".into())
        }
    }

    #[tokio::test]
    async fn local_handler_failure_does_not_fail_sender() {
        let dispatcher = Arc::new(InMemoryDispatcher::new(Arc::new(InMemoryRouter::new())));
        dispatcher
            .install(vec![Subscription::event(Pinged::type_key(), Arc::new(Failing))])
            .await
            .unwrap();
        let endpoint = LoopbackEndpoint::new("local", &dispatcher);
        let envelope = Envelope::from_contract(&Pinged).unwrap();

        assert!(dispatcher.dispatch(envelope.clone()).await.is_err());
        endpoint.send(&envelope).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_dispatcher_is_tolerated() {
        let dispatcher = Arc::new(InMemoryDispatcher::new(Arc::new(InMemoryRouter::new())));
        let endpoint = LoopbackEndpoint::new("local", &dispatcher);
        drop(dispatcher);

        endpoint
            .send(&Envelope::from_contract(&Pinged).unwrap())
            .await
            .unwrap();
    }
}
