use std::sync::Arc;

use async_trait::async_trait;
use bus::MessageCodec;

use crate::{InstanceFilter, InstanceId, Result, Revision, SagaInstance};

/// Durable keyed storage for saga instances.
///
/// Implementations must make each `load` and each `save` atomic per key.
/// They do not need to lock: callers serialize read-modify-write cycles
/// for one instance with an [`InstanceMutex`](crate::InstanceMutex).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Loads an instance.
    ///
    /// Returns None if the instance was never saved.
    async fn load(&self, id: &InstanceId) -> Result<Option<SagaInstance>>;

    /// Saves an instance.
    ///
    /// `instance.revision` must equal the stored revision (or
    /// [`Revision::initial`] for a new instance), otherwise the write fails
    /// with `RevisionConflict`. Returns the new stored revision.
    async fn save(&self, instance: &SagaInstance) -> Result<Revision>;

    /// Lists instances matching a filter.
    async fn list(&self, filter: InstanceFilter) -> Result<Vec<SagaInstance>>;
}

/// Builds a store bound to the bus codec.
///
/// Stores receive the codec of the message bus so that persisted payloads
/// use the same serialization as the wire.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    /// Creates the store.
    async fn create(&self, codec: Arc<dyn MessageCodec>) -> Result<Arc<dyn SagaStore>>;
}
