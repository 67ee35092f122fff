use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bus::MessageCodec;
use tokio::sync::RwLock;

use crate::{
    InstanceFilter, InstanceId, Result, Revision, SagaInstance, StoreError,
    store::{SagaStore, StoreFactory},
};

/// In-memory saga store.
///
/// Records are kept encoded with the bus codec, exactly as a durable backend
/// would hold them, so every load decodes a fresh copy.
#[derive(Clone)]
pub struct InMemorySagaStore {
    codec: Arc<dyn MessageCodec>,
    records: Arc<RwLock<HashMap<InstanceId, Vec<u8>>>>,
}

impl InMemorySagaStore {
    /// Creates an empty store using `codec` for stored records.
    pub fn new(codec: Arc<dyn MessageCodec>) -> Self {
        Self {
            codec,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the number of stored instances.
    pub async fn instance_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Clears all instances.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    fn decode(&self, bytes: &[u8]) -> Result<SagaInstance> {
        let value = self.codec.decode(bytes)?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn load(&self, id: &InstanceId) -> Result<Option<SagaInstance>> {
        let records = self.records.read().await;
        records.get(id).map(|bytes| self.decode(bytes)).transpose()
    }

    async fn save(&self, instance: &SagaInstance) -> Result<Revision> {
        let mut records = self.records.write().await;

        let current = match records.get(&instance.id) {
            Some(bytes) => self.decode(bytes)?.revision,
            None => Revision::initial(),
        };

        if instance.revision != current {
            return Err(StoreError::RevisionConflict {
                instance_id: instance.id.clone(),
                expected: instance.revision,
                actual: current,
            });
        }

        let mut stored = instance.clone();
        stored.revision = current.next();
        let bytes = self.codec.encode(&serde_json::to_value(&stored)?)?;
        records.insert(stored.id.clone(), bytes);

        Ok(stored.revision)
    }

    async fn list(&self, filter: InstanceFilter) -> Result<Vec<SagaInstance>> {
        let records = self.records.read().await;
        let mut instances = Vec::new();
        for bytes in records.values() {
            let instance = self.decode(bytes)?;
            if filter.matches(&instance) {
                instances.push(instance);
            }
        }

        instances.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let offset = filter.offset.unwrap_or(0);
        let instances = instances.into_iter().skip(offset);
        Ok(match filter.limit {
            Some(limit) => instances.take(limit).collect(),
            None => instances.collect(),
        })
    }
}

/// Factory producing [`InMemorySagaStore`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryStoreFactory;

#[async_trait]
impl StoreFactory for InMemoryStoreFactory {
    async fn create(&self, codec: Arc<dyn MessageCodec>) -> Result<Arc<dyn SagaStore>> {
        Ok(Arc::new(InMemorySagaStore::new(codec)))
    }
}
