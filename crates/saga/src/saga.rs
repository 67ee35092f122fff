//! Saga definitions and their registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bus::TypeKey;

use crate::context::SagaContext;
use crate::error::{BootError, SagaFailure};

/// A long-running process expressed as a set of event handlers.
///
/// One definition serves every instance of its type; per-instance state
/// lives in the [`SagaContext`] payload, never in the definition itself.
///
/// # Example
///
/// ```ignore
/// struct OrderSaga;
///
/// #[async_trait]
/// impl Saga for OrderSaga {
///     fn saga_type(&self) -> &str { "OrderSaga" }
///
///     fn event_handlers(&self) -> Vec<TypeKey> {
///         vec![OrderPaid::type_key(), OrderShipped::type_key()]
///     }
///
///     async fn start(&self, _ctx: &mut SagaContext<'_>) -> Result<(), SagaFailure> {
///         Ok(())
///     }
///
///     async fn handle(&self, event: &TypeKey, ctx: &mut SagaContext<'_>) -> Result<(), SagaFailure> {
///         if event.as_str() == OrderShipped::KIND {
///             ctx.complete(ctx.payload().clone());
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Saga: Send + Sync {
    /// Type key this saga is registered and started under.
    fn saga_type(&self) -> &str;

    /// Event types this saga handles.
    ///
    /// Each must be known to the scheme registry at boot.
    fn event_handlers(&self) -> Vec<TypeKey>;

    /// Called once at boot before the saga's events are subscribed.
    fn init(&self) -> Result<(), SagaFailure> {
        Ok(())
    }

    /// Runs when an instance is started.
    ///
    /// On error nothing is persisted.
    async fn start(&self, ctx: &mut SagaContext<'_>) -> Result<(), SagaFailure>;

    /// Applies an event to a non-terminal instance.
    ///
    /// On error, changes made to the context so far are persisted and the
    /// error is returned to the dispatcher.
    async fn handle(
        &self,
        event_type: &TypeKey,
        ctx: &mut SagaContext<'_>,
    ) -> Result<(), SagaFailure>;

    /// Rolls back a running process.
    ///
    /// May be invoked again with the same reason on recovery, so it must be
    /// idempotent. The instance ends up `Failed` unless the context is
    /// completed.
    async fn compensate(
        &self,
        _ctx: &mut SagaContext<'_>,
        _reason: &str,
    ) -> Result<(), SagaFailure> {
        Ok(())
    }

    /// Resumes a `Running` instance after a crash or a delivery gap.
    ///
    /// The default only re-reads the stored state and has no side effects.
    /// Override it to re-run logic.
    async fn recover(&self, _ctx: &mut SagaContext<'_>) -> Result<(), SagaFailure> {
        Ok(())
    }
}

struct Entry {
    saga: Arc<dyn Saga>,
    events: Vec<TypeKey>,
}

/// Saga definitions keyed by saga type. Frozen after boot.
#[derive(Default)]
pub struct SagaRegistry {
    sagas: HashMap<String, Entry>,
}

impl SagaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a saga. Type keys must be unique.
    ///
    /// The saga's declared event types are read once, here, and frozen. Call
    /// it after the saga's [`init`](Saga::init) hook has run.
    pub fn register(&mut self, saga: Arc<dyn Saga>) -> Result<(), BootError> {
        let saga_type = saga.saga_type().to_string();
        if self.sagas.contains_key(&saga_type) {
            return Err(BootError::DuplicateSagaType(saga_type));
        }
        let mut seen = HashSet::new();
        let events = saga
            .event_handlers()
            .into_iter()
            .filter(|kind| seen.insert(kind.clone()))
            .collect();
        self.sagas.insert(saga_type, Entry { saga, events });
        Ok(())
    }

    /// Event types frozen for `saga_type` at registration, in declaration
    /// order.
    pub fn event_types(&self, saga_type: &str) -> &[TypeKey] {
        self.sagas
            .get(saga_type)
            .map(|e| e.events.as_slice())
            .unwrap_or_default()
    }

    pub fn get(&self, saga_type: &str) -> Option<Arc<dyn Saga>> {
        self.sagas.get(saga_type).map(|e| e.saga.clone())
    }

    /// Returns true if `saga_type` declares a handler for `kind`.
    pub fn handles(&self, saga_type: &str, kind: &TypeKey) -> bool {
        self.sagas
            .get(saga_type)
            .is_some_and(|e| e.events.contains(kind))
    }

    /// Registered saga types, sorted.
    pub fn saga_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.sagas.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.sagas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sagas.is_empty()
    }
}

impl std::fmt::Debug for SagaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaRegistry")
            .field("sagas", &self.saga_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Saga for Named {
        fn saga_type(&self) -> &str {
            self.0
        }

        fn event_handlers(&self) -> Vec<TypeKey> {
            vec![TypeKey::from_static("orders.OrderPaid")]
        }

        async fn start(&self, _ctx: &mut SagaContext<'_>) -> Result<(), SagaFailure> {
            Ok(())
        }

        async fn handle(
            &self,
            _event_type: &TypeKey,
            _ctx: &mut SagaContext<'_>,
        ) -> Result<(), SagaFailure> {
            Ok(())
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = SagaRegistry::new();
        registry.register(Arc::new(Named("B"))).unwrap();
        registry.register(Arc::new(Named("A"))).unwrap();

        assert_eq!(registry.saga_types(), vec!["A", "B"]);
        assert!(registry.get("A").is_some());
        assert!(registry.get("C").is_none());
        assert!(registry.handles("A", &TypeKey::from_static("orders.OrderPaid")));
        assert!(!registry.handles("A", &TypeKey::from_static("orders.OrderShipped")));
        assert!(!registry.handles("C", &TypeKey::from_static("orders.OrderPaid")));
    }

    #[test]
    fn duplicate_type_is_rejected() {
        let mut registry = SagaRegistry::new();
        registry.register(Arc::new(Named("A"))).unwrap();
        let err = registry.register(Arc::new(Named("A"))).unwrap_err();
        assert!(matches!(err, BootError::DuplicateSagaType(t) if t == "A"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn event_types_are_frozen_and_deduplicated() {
        struct Repeats;

        #[async_trait]
        impl Saga for Repeats {
            fn saga_type(&self) -> &str {
                "Repeats"
            }

            fn event_handlers(&self) -> Vec<TypeKey> {
                vec![
                    TypeKey::from_static("orders.OrderShipped"),
                    TypeKey::from_static("orders.OrderPaid"),
                    TypeKey::from_static("orders.OrderShipped"),
                ]
            }

            async fn start(&self, _ctx: &mut SagaContext<'_>) -> Result<(), SagaFailure> {
                Ok(())
            }

            async fn handle(
                &self,
                _event_type: &TypeKey,
                _ctx: &mut SagaContext<'_>,
            ) -> Result<(), SagaFailure> {
                Ok(())
            }
        }

        let mut registry = SagaRegistry::new();
        registry.register(Arc::new(Repeats)).unwrap();

        assert_eq!(
            registry.event_types("Repeats"),
            &[
                TypeKey::from_static("orders.OrderShipped"),
                TypeKey::from_static("orders.OrderPaid"),
            ]
        );
        assert!(registry.event_types("Missing").is_empty());
    }
}
