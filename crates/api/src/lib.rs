//! HTTP host for the saga component.
//!
//! Boots the demo saga on an in-process bus and serves the read-only
//! saga status API next to health and Prometheus metrics, with
//! structured logging (tracing).

pub mod config;
pub mod demo;
pub mod endpoint;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use bus::{InMemoryDispatcher, InMemoryRouter, JsonCodec, KnownTypesRegistry, MessageBus};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{BoundSagaComponent, Saga, SagaComponent, register_lifecycle_contracts};
use saga_store::{
    InMemoryStoreFactory, InstanceMutex, LocalInstanceMutex, PostgresAdvisoryMutex,
    PostgresStoreFactory, StoreFactory,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use endpoint::LoopbackEndpoint;
use error::Result;

/// The booted saga component and the dispatcher that feeds it.
pub struct SagaHost {
    pub dispatcher: Arc<InMemoryDispatcher>,
    pub component: BoundSagaComponent,
}

/// Chooses the store and mutex backends.
///
/// With `DATABASE_URL` set, instances live in Postgres and are locked with
/// advisory locks; otherwise everything stays in process.
pub async fn backends(config: &Config) -> Result<(Arc<dyn StoreFactory>, Arc<dyn InstanceMutex>)> {
    match &config.database_url {
        Some(url) => {
            tracing::info!("using Postgres saga store");
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            Ok((
                Arc::new(PostgresStoreFactory::new(pool.clone()).with_migrations()),
                Arc::new(PostgresAdvisoryMutex::new(pool)),
            ))
        }
        None => {
            tracing::info!("using in-memory saga store");
            Ok((
                Arc::new(InMemoryStoreFactory),
                Arc::new(LocalInstanceMutex::new()),
            ))
        }
    }
}

/// Builds the in-process bus and boots the saga component on it.
pub async fn boot(
    config: &Config,
    store_factory: Arc<dyn StoreFactory>,
    mutex: Arc<dyn InstanceMutex>,
) -> Result<SagaHost> {
    let router = Arc::new(InMemoryRouter::new());
    let dispatcher = Arc::new(InMemoryDispatcher::new(router.clone()));

    let scheme = Arc::new(KnownTypesRegistry::new());
    register_lifecycle_contracts(&scheme)?;
    demo::register_contracts(&scheme)?;

    let bus = MessageBus::new(
        Arc::new(JsonCodec::new()),
        dispatcher.clone(),
        router,
        scheme,
    );

    let mut component = SagaComponent::new(store_factory, mutex).with_config(config.component_config());
    component
        .register_sagas([Arc::new(demo::OrderSaga) as Arc<dyn Saga>])
        .register_endpoints([
            Arc::new(LoopbackEndpoint::new("local", &dispatcher)) as Arc<dyn bus::Endpoint>
        ]);
    let component = component.initialize(&bus).await?;

    Ok(SagaHost {
        dispatcher,
        component,
    })
}

/// Creates the Axum application router with all routes.
pub fn create_app(host: &SagaHost, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let mut app = Router::new()
        .route("/health", get(routes::health::check))
        .merge(metrics_router);

    if let Some(status_routes) = host.component.status_routes() {
        app = app.merge(status_routes);
    }

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(TraceLayer::new_for_http())
}
