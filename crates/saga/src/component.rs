//! Boot-time binding of sagas to the message bus.

use std::collections::HashSet;
use std::sync::Arc;

use bus::{Endpoint, MessageBus, MessageHandler, MessageRole, Subscription, TypeKey};
use saga_store::{InstanceMutex, SagaStore, StoreFactory};

use crate::config::ComponentConfig;
use crate::contracts::{lifecycle_commands, lifecycle_contracts};
use crate::error::BootError;
use crate::handlers::{ControlHandler, EventHandler, HandlerCore};
use crate::saga::{Saga, SagaRegistry};
use crate::status;

/// Collects sagas, contracts and endpoints, then binds them to a bus.
///
/// Registration calls accumulate; [`initialize`](Self::initialize) consumes
/// the component, so it can only be bound once.
///
/// ```ignore
/// let mut component = SagaComponent::new(Arc::new(InMemoryStoreFactory), Arc::new(LocalInstanceMutex::new()));
/// component.register_sagas([Arc::new(OrderSaga) as Arc<dyn Saga>]);
/// component.register_endpoints([endpoint]);
/// let bound = component.initialize(&bus).await?;
/// ```
pub struct SagaComponent {
    sagas: Vec<Arc<dyn Saga>>,
    contracts: Vec<TypeKey>,
    endpoints: Vec<Arc<dyn Endpoint>>,
    store_factory: Arc<dyn StoreFactory>,
    mutex: Arc<dyn InstanceMutex>,
    config: ComponentConfig,
}

impl SagaComponent {
    pub fn new(store_factory: Arc<dyn StoreFactory>, mutex: Arc<dyn InstanceMutex>) -> Self {
        Self {
            sagas: Vec::new(),
            contracts: Vec::new(),
            endpoints: Vec::new(),
            store_factory,
            mutex,
            config: ComponentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ComponentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register_sagas(&mut self, sagas: impl IntoIterator<Item = Arc<dyn Saga>>) -> &mut Self {
        self.sagas.extend(sagas);
        self
    }

    /// Adds user contracts carried by every saga endpoint, next to the
    /// lifecycle contracts.
    pub fn register_contracts(&mut self, contracts: impl IntoIterator<Item = TypeKey>) -> &mut Self {
        self.contracts.extend(contracts);
        self
    }

    pub fn register_endpoints(
        &mut self,
        endpoints: impl IntoIterator<Item = Arc<dyn Endpoint>>,
    ) -> &mut Self {
        self.endpoints.extend(endpoints);
        self
    }

    /// Binds the component to the bus.
    ///
    /// Steps run in order and the first failure aborts boot. Subscriptions
    /// and endpoint registrations are only handed to the dispatcher and
    /// router once every step has succeeded, so a failed boot leaves
    /// nothing subscribed.
    #[tracing::instrument(skip_all, fields(sagas = self.sagas.len(), endpoints = self.endpoints.len()))]
    pub async fn initialize(self, bus: &MessageBus) -> Result<BoundSagaComponent, BootError> {
        match self.bind(bus).await {
            Ok(bound) => {
                metrics::counter!("saga_boot_total", "outcome" => "ok").increment(1);
                tracing::info!(
                    subscriptions = bound.subscriptions.len(),
                    "saga component initialized"
                );
                Ok(bound)
            }
            Err(err) => {
                metrics::counter!("saga_boot_total", "outcome" => "error").increment(1);
                tracing::error!(error = %err, "saga component failed to initialize");
                Err(err)
            }
        }
    }

    async fn bind(self, bus: &MessageBus) -> Result<BoundSagaComponent, BootError> {
        // 1. Configuration
        let config = self.config.resolve();

        // 2. Store, sharing the bus codec
        let store = self
            .store_factory
            .create(bus.codec())
            .await
            .map_err(BootError::StoreFactory)?;

        // 3. Status routes
        let status_routes = config
            .api_mount
            .as_deref()
            .map(|mount| status::mounted(mount, store.clone()));

        // 4. Handlers, over sagas initialized and frozen once
        let mut registry = SagaRegistry::new();
        for saga in &self.sagas {
            saga.init().map_err(|source| BootError::SagaInit {
                saga_type: saga.saga_type().to_string(),
                source,
            })?;
            registry.register(saga.clone())?;
        }
        let registry = Arc::new(registry);
        let core = Arc::new(HandlerCore {
            store: store.clone(),
            mutex: self.mutex.clone(),
            registry: registry.clone(),
            lock_timeout: config.lock_timeout,
        });
        let control: Arc<dyn MessageHandler> = Arc::new(ControlHandler::new(core.clone()));
        let events: Arc<dyn MessageHandler> =
            Arc::new(EventHandler::new(core, config.id_extractor));

        // 5. Lifecycle commands
        let mut subscriptions: Vec<Subscription> = lifecycle_commands()
            .into_iter()
            .map(|kind| Subscription::command(kind, control.clone()))
            .collect();

        // 6. Saga events, each known to the scheme
        let scheme = bus.scheme();
        let mut subscribed = HashSet::new();
        for saga in &self.sagas {
            let saga_type = saga.saga_type();
            for kind in registry.event_types(saga_type) {
                scheme
                    .resolve(kind)
                    .map_err(|source| BootError::UnresolvedEventType {
                        saga_type: saga_type.to_string(),
                        kind: kind.clone(),
                        source,
                    })?;
                if subscribed.insert(kind.clone()) {
                    subscriptions.push(Subscription::event(kind.clone(), events.clone()));
                }
            }
        }

        // 7. Endpoints
        let mut carried: Vec<TypeKey> = lifecycle_contracts().to_vec();
        carried.extend(self.contracts.iter().cloned());
        let registrations: Vec<(Arc<dyn Endpoint>, Vec<TypeKey>)> = self
            .endpoints
            .iter()
            .map(|endpoint| (endpoint.clone(), carried.clone()))
            .collect();

        let table: Vec<(TypeKey, MessageRole)> = subscriptions
            .iter()
            .map(|s| (s.kind.clone(), s.role))
            .collect();
        bus.dispatcher().install(subscriptions).await?;

        let router = bus.router();
        let mut endpoints = Vec::with_capacity(registrations.len());
        for (endpoint, contracts) in registrations {
            tracing::debug!(endpoint = endpoint.name(), contracts = contracts.len(), "registering saga endpoint");
            endpoints.push((endpoint.name().to_string(), contracts.clone()));
            router.register_endpoint(endpoint, &contracts).await;
        }

        Ok(BoundSagaComponent {
            store,
            subscriptions: table,
            endpoints,
            api_mount: config.api_mount,
            status_routes,
        })
    }
}

/// A saga component bound to a bus. Its subscription table and endpoint
/// registrations are frozen.
pub struct BoundSagaComponent {
    store: Arc<dyn SagaStore>,
    subscriptions: Vec<(TypeKey, MessageRole)>,
    endpoints: Vec<(String, Vec<TypeKey>)>,
    api_mount: Option<String>,
    status_routes: Option<axum::Router>,
}

impl BoundSagaComponent {
    /// The store built at boot.
    pub fn store(&self) -> Arc<dyn SagaStore> {
        self.store.clone()
    }

    /// Installed subscriptions, in installation order.
    pub fn subscriptions(&self) -> &[(TypeKey, MessageRole)] {
        &self.subscriptions
    }

    /// Contracts registered per endpoint name.
    pub fn endpoint_contracts(&self) -> &[(String, Vec<TypeKey>)] {
        &self.endpoints
    }

    pub fn api_mount(&self) -> Option<&str> {
        self.api_mount.as_deref()
    }

    /// Read-only status routes, already placed under the configured mount.
    ///
    /// None unless an API mount was configured.
    pub fn status_routes(&self) -> Option<axum::Router> {
        self.status_routes.clone()
    }
}

impl std::fmt::Debug for BoundSagaComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundSagaComponent")
            .field("subscriptions", &self.subscriptions)
            .field("endpoints", &self.endpoints)
            .field("api_mount", &self.api_mount)
            .finish_non_exhaustive()
    }
}
