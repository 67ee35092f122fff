use std::sync::Arc;

use async_trait::async_trait;
use bus::{HandlerError, MessageContext, MessageHandler};
use saga_store::InstanceId;

use super::{HandlerCore, emit_completion, settle};
use crate::context::SagaContext;
use crate::error::{Result, SagaError};
use crate::id_extractor::IdExtractor;

/// Delivers events to the saga instance they address.
///
/// The instance is located with the configured [`IdExtractor`]. Events for
/// terminal instances, and events whose message id the instance already
/// processed, are acknowledged without invoking saga logic.
pub struct EventHandler {
    core: Arc<HandlerCore>,
    id_extractor: Arc<dyn IdExtractor>,
}

impl EventHandler {
    pub(crate) fn new(core: Arc<HandlerCore>, id_extractor: Arc<dyn IdExtractor>) -> Self {
        Self { core, id_extractor }
    }

    /// Handles one event delivery.
    #[tracing::instrument(skip(self, ctx), fields(kind = %ctx.message().kind, message_id = %ctx.message().id))]
    pub async fn handle_event(&self, ctx: &MessageContext) -> Result<()> {
        let message = ctx.message();
        let id = self
            .id_extractor
            .extract(message)
            .ok_or_else(|| SagaError::MissingInstanceId {
                kind: message.kind.clone(),
            })?;

        let lock = self.core.lock(&id, ctx.cancellation()).await?;
        let result = self.apply(ctx, &id).await;
        self.core.unlock(lock, result).await
    }

    async fn apply(&self, ctx: &MessageContext, id: &InstanceId) -> Result<()> {
        let message = ctx.message();
        let mut instance = self.core.load(id).await?;

        if instance.is_terminal() {
            tracing::debug!(instance_id = %id, status = %instance.status, "event for finished saga ignored");
            return Ok(());
        }
        if instance.has_processed(&message.id) {
            tracing::debug!(instance_id = %id, "event already processed");
            return Ok(());
        }
        if !self.core.registry.handles(&instance.saga_type, &message.kind) {
            return Err(SagaError::UnhandledEvent {
                saga_type: instance.saga_type.clone(),
                kind: message.kind.clone(),
            });
        }
        let saga = self
            .core
            .registry
            .get(&instance.saga_type)
            .ok_or_else(|| SagaError::UnknownSagaType(instance.saga_type.clone()))?;

        metrics::counter!("saga_events_total", "saga_type" => instance.saga_type.clone())
            .increment(1);

        let mut saga_ctx = SagaContext::new(&mut instance, ctx);
        let applied = saga.handle(&message.kind, &mut saga_ctx).await;
        let outcome = saga_ctx.into_outcome();

        if let Err(failure) = applied {
            tracing::warn!(instance_id = %id, error = %failure, "saga logic failed, keeping partial state");
            instance.last_error = Some(failure.to_string());
            instance.updated_at = chrono::Utc::now();
            self.core.save(&mut instance).await?;
            return Err(failure.into());
        }

        let completed = settle(&mut instance, outcome);
        instance.record(message.id, message.kind.clone());
        self.core.save(&mut instance).await?;

        tracing::debug!(instance_id = %id, status = %instance.status, revision = %instance.revision, "event applied");
        if let Some(result) = completed {
            emit_completion(ctx, &instance, result)?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for EventHandler {
    async fn handle(&self, ctx: &MessageContext) -> std::result::Result<(), HandlerError> {
        self.handle_event(ctx).await.map_err(|err| {
            metrics::counter!("saga_handler_errors_total", "handler" => "event").increment(1);
            err.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{OrderPaid, OrderRejected, OrderSaga, OrderShipped};
    use crate::id_extractor::{HeaderIdExtractor, SAGA_ID_HEADER};
    use crate::saga::SagaRegistry;
    use bus::{Contract, Envelope, JsonCodec};
    use saga_store::{
        InMemorySagaStore, InstanceMutex, LocalInstanceMutex, SagaInstance, SagaState, SagaStore,
    };
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        handler: EventHandler,
        store: InMemorySagaStore,
        mutex: LocalInstanceMutex,
        saga: Arc<OrderSaga>,
    }

    fn fixture() -> Fixture {
        let store = InMemorySagaStore::new(Arc::new(JsonCodec::new()));
        let mutex = LocalInstanceMutex::new();
        let saga = Arc::new(OrderSaga::default());
        let mut registry = SagaRegistry::new();
        registry.register(saga.clone()).unwrap();

        let core = Arc::new(HandlerCore {
            store: Arc::new(store.clone()),
            mutex: Arc::new(mutex.clone()),
            registry: Arc::new(registry),
            lock_timeout: Duration::from_millis(100),
        });
        Fixture {
            handler: EventHandler::new(core, Arc::new(HeaderIdExtractor::default())),
            store,
            mutex,
            saga,
        }
    }

    async fn running(store: &InMemorySagaStore, id: &str) -> SagaInstance {
        let mut instance =
            SagaInstance::new(InstanceId::from(id), "OrderSaga", serde_json::json!({}));
        instance.status = SagaState::Running;
        instance.revision = store.save(&instance).await.unwrap();
        instance
    }

    fn event<T: Contract>(message: &T, id: &str) -> MessageContext {
        MessageContext::new(
            Envelope::from_contract(message)
                .unwrap()
                .with_header(SAGA_ID_HEADER, id),
        )
    }

    #[tokio::test]
    async fn applies_event_and_persists() {
        let f = fixture();
        running(&f.store, "1").await;

        f.handler
            .handle_event(&event(&OrderPaid { amount: 30 }, "1"))
            .await
            .unwrap();

        let stored = f.store.load(&InstanceId::from("1")).await.unwrap().unwrap();
        assert_eq!(stored.payload["paid"], 30);
        assert_eq!(stored.status, SagaState::Running);
        assert_eq!(stored.history.len(), 1);
        assert_eq!(f.mutex.tracked(), 0);
    }

    #[tokio::test]
    async fn completion_emits_lifecycle_event() {
        let f = fixture();
        running(&f.store, "1").await;

        let ctx = event(&OrderShipped, "1");
        f.handler.handle_event(&ctx).await.unwrap();

        let stored = f.store.load(&InstanceId::from("1")).await.unwrap().unwrap();
        assert_eq!(stored.status, SagaState::Completed);

        let outbox = ctx.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].kind.as_str(), "saga.SagaCompletedEvent");
    }

    #[tokio::test]
    async fn child_completion_notifies_parent() {
        let f = fixture();
        let mut child = SagaInstance::new(InstanceId::from("child"), "OrderSaga", serde_json::json!({}))
            .with_parent(Some(InstanceId::from("parent")));
        child.status = SagaState::Running;
        f.store.save(&child).await.unwrap();

        let ctx = event(&OrderShipped, "child");
        f.handler.handle_event(&ctx).await.unwrap();

        let outbox = ctx.take_outbox();
        let notice = outbox
            .iter()
            .find(|m| m.kind.as_str() == "saga.SagaChildCompletedEvent")
            .unwrap();
        assert_eq!(notice.header(SAGA_ID_HEADER), Some("parent"));
        assert_eq!(notice.payload["child_instance_id"], "child");
    }

    #[tokio::test]
    async fn event_for_terminal_instance_is_ignored() {
        let f = fixture();
        running(&f.store, "1").await;
        f.handler
            .handle_event(&event(&OrderShipped, "1"))
            .await
            .unwrap();
        let before = f.store.load(&InstanceId::from("1")).await.unwrap().unwrap();

        f.handler
            .handle_event(&event(&OrderShipped, "1"))
            .await
            .unwrap();

        let after = f.store.load(&InstanceId::from("1")).await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(OrderSaga::calls(&f.saga.handled), 1);
    }

    #[tokio::test]
    async fn redelivered_message_is_ignored() {
        let f = fixture();
        running(&f.store, "1").await;
        let ctx = event(&OrderPaid { amount: 5 }, "1");

        f.handler.handle_event(&ctx).await.unwrap();
        f.handler.handle_event(&ctx).await.unwrap();

        assert_eq!(OrderSaga::calls(&f.saga.handled), 1);
        let stored = f.store.load(&InstanceId::from("1")).await.unwrap().unwrap();
        assert_eq!(stored.history.len(), 1);
    }

    #[tokio::test]
    async fn unknown_instance_is_reported() {
        let f = fixture();
        let err = f
            .handler
            .handle_event(&event(&OrderPaid { amount: 1 }, "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::InstanceNotFound(id) if id.as_str() == "missing"));
        assert_eq!(f.mutex.tracked(), 0);
    }

    #[tokio::test]
    async fn missing_id_is_reported() {
        let f = fixture();
        let ctx = MessageContext::new(Envelope::from_contract(&OrderPaid { amount: 1 }).unwrap());
        let err = f.handler.handle_event(&ctx).await.unwrap_err();
        assert!(matches!(err, SagaError::MissingInstanceId { .. }));
    }

    #[tokio::test]
    async fn undeclared_event_is_reported() {
        let f = fixture();
        running(&f.store, "1").await;
        let ctx = MessageContext::new(
            Envelope::builder()
                .kind("orders.OrderRefunded")
                .header(SAGA_ID_HEADER, "1")
                .build(),
        );

        let err = f.handler.handle_event(&ctx).await.unwrap_err();
        assert!(matches!(err, SagaError::UnhandledEvent { .. }));
    }

    #[tokio::test]
    async fn domain_error_keeps_partial_state() {
        let f = fixture();
        running(&f.store, "1").await;

        let err = f
            .handler
            .handle_event(&event(&OrderRejected, "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Failure(_)));

        let stored = f.store.load(&InstanceId::from("1")).await.unwrap().unwrap();
        assert_eq!(stored.payload["partial"], true);
        assert_eq!(stored.last_error.as_deref(), Some("order rejected"));
        assert_eq!(stored.status, SagaState::Running);
        assert!(stored.history.is_empty());
        assert_eq!(f.mutex.tracked(), 0);
    }

    #[tokio::test]
    async fn lock_timeout_is_reported() {
        let f = fixture();
        running(&f.store, "1").await;
        let held = f
            .mutex
            .acquire(
                &InstanceId::from("1"),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let err = f
            .handler
            .handle_event(&event(&OrderPaid { amount: 1 }, "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::LockTimeout { .. }));
        assert_eq!(OrderSaga::calls(&f.saga.handled), 0);

        f.mutex.release(held).await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_flow_aborts_before_loading() {
        let f = fixture();
        running(&f.store, "1").await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = MessageContext::with_cancellation(
            Envelope::from_contract(&OrderPaid { amount: 1 })
                .unwrap()
                .with_header(SAGA_ID_HEADER, "1"),
            cancel,
        );

        let err = f.handler.handle_event(&ctx).await.unwrap_err();
        assert!(matches!(err, SagaError::Cancelled(_)));
        assert_eq!(OrderSaga::calls(&f.saga.handled), 0);
        assert_eq!(f.mutex.tracked(), 0);
    }
}
