//! Outbound routing of contracts to endpoints.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::message::{Envelope, TypeKey};

/// A transport target for outbound messages.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Endpoint name, unique per router.
    fn name(&self) -> &str;

    /// Sends a message.
    async fn send(&self, envelope: &Envelope) -> Result<()>;
}

/// Maps outbound contract types to endpoints.
#[async_trait]
pub trait Router: Send + Sync {
    /// Declares that `endpoint` carries the given contracts.
    ///
    /// Registering the same endpoint again adds to its contract set.
    async fn register_endpoint(&self, endpoint: Arc<dyn Endpoint>, contracts: &[TypeKey]);

    /// Returns every endpoint that carries `kind`.
    async fn route(&self, kind: &TypeKey) -> Vec<Arc<dyn Endpoint>>;
}

struct Registration {
    endpoint: Arc<dyn Endpoint>,
    contracts: BTreeSet<TypeKey>,
}

/// In-memory router.
#[derive(Default)]
pub struct InMemoryRouter {
    registrations: RwLock<Vec<Registration>>,
}

impl InMemoryRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the contracts registered for the named endpoint, sorted.
    pub async fn contracts_for(&self, endpoint: &str) -> Vec<TypeKey> {
        self.registrations
            .read()
            .await
            .iter()
            .find(|r| r.endpoint.name() == endpoint)
            .map(|r| r.contracts.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the names of all registered endpoints.
    pub async fn endpoints(&self) -> Vec<String> {
        self.registrations
            .read()
            .await
            .iter()
            .map(|r| r.endpoint.name().to_string())
            .collect()
    }
}

#[async_trait]
impl Router for InMemoryRouter {
    async fn register_endpoint(&self, endpoint: Arc<dyn Endpoint>, contracts: &[TypeKey]) {
        let mut registrations = self.registrations.write().await;
        match registrations
            .iter_mut()
            .find(|r| r.endpoint.name() == endpoint.name())
        {
            Some(existing) => existing.contracts.extend(contracts.iter().cloned()),
            None => registrations.push(Registration {
                endpoint,
                contracts: contracts.iter().cloned().collect(),
            }),
        }
    }

    async fn route(&self, kind: &TypeKey) -> Vec<Arc<dyn Endpoint>> {
        self.registrations
            .read()
            .await
            .iter()
            .filter(|r| r.contracts.contains(kind))
            .map(|r| r.endpoint.clone())
            .collect()
    }
}

/// Endpoint that records every message it is sent.
#[derive(Clone)]
pub struct InMemoryEndpoint {
    name: String,
    sent: Arc<RwLock<Vec<Envelope>>>,
}

impl InMemoryEndpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sent: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Returns every message sent so far, in order.
    pub async fn sent(&self) -> Vec<Envelope> {
        self.sent.read().await.clone()
    }

    /// Returns the messages of one kind, in order.
    pub async fn sent_of_kind(&self, kind: &TypeKey) -> Vec<Envelope> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|e| &e.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Endpoint for InMemoryEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.sent.write().await.push(envelope.clone());
        Ok(())
    }
}
