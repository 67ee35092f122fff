//! Bus handlers driving saga instances.
//!
//! Both handlers follow the same cycle for one instance: acquire its lock,
//! load, apply saga logic, persist, release. The lock is released on every
//! path, including errors.

mod control;
mod event;

pub use control::ControlHandler;
pub use event::EventHandler;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bus::{Envelope, MessageContext};
use saga_store::{InstanceId, InstanceLock, InstanceMutex, SagaInstance, SagaState, SagaStore};
use tokio_util::sync::CancellationToken;

use crate::contracts::{SagaChildCompletedEvent, SagaCompletedEvent};
use crate::context::Outcome;
use crate::error::{Result, SagaError};
use crate::id_extractor::SAGA_ID_HEADER;
use crate::saga::SagaRegistry;

/// State shared by the control and event handlers.
pub(crate) struct HandlerCore {
    pub(crate) store: Arc<dyn SagaStore>,
    pub(crate) mutex: Arc<dyn InstanceMutex>,
    pub(crate) registry: Arc<SagaRegistry>,
    pub(crate) lock_timeout: Duration,
}

impl HandlerCore {
    pub(crate) async fn lock(
        &self,
        id: &InstanceId,
        cancel: &CancellationToken,
    ) -> Result<InstanceLock> {
        let started = Instant::now();
        let lock = self.mutex.acquire(id, self.lock_timeout, cancel).await;
        metrics::histogram!("saga_lock_wait_seconds").record(started.elapsed().as_secs_f64());
        Ok(lock?)
    }

    /// Releases the lock, folding a release failure into the result.
    pub(crate) async fn unlock<T>(&self, lock: InstanceLock, result: Result<T>) -> Result<T> {
        let id = lock.instance_id().clone();
        match self.mutex.release(lock).await {
            Ok(()) => result,
            Err(err) => {
                tracing::warn!(instance_id = %id, error = %err, "failed to release instance lock");
                result.and(Err(SagaError::Mutex(err)))
            }
        }
    }

    pub(crate) async fn load(&self, id: &InstanceId) -> Result<SagaInstance> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| SagaError::InstanceNotFound(id.clone()))
    }

    pub(crate) async fn save(&self, instance: &mut SagaInstance) -> Result<()> {
        instance.revision = self.store.save(instance).await?;
        Ok(())
    }
}

/// Applies a terminal outcome requested by saga logic.
///
/// Returns the completion result when the instance completed.
pub(crate) fn settle(
    instance: &mut SagaInstance,
    outcome: Option<Outcome>,
) -> Option<serde_json::Value> {
    match outcome? {
        Outcome::Completed(result) => {
            instance.status = SagaState::Completed;
            Some(result)
        }
        Outcome::Failed(reason) => {
            instance.status = SagaState::Failed;
            instance.last_error = Some(reason);
            None
        }
    }
}

/// Queues the completion events for an instance that reached `Completed`.
///
/// Children also notify their parent, addressed through the `saga-id`
/// header.
pub(crate) fn emit_completion(
    ctx: &MessageContext,
    instance: &SagaInstance,
    result: serde_json::Value,
) -> Result<()> {
    tracing::info!(instance_id = %instance.id, saga_type = %instance.saga_type, "saga completed");
    metrics::counter!("saga_completed_total", "saga_type" => instance.saga_type.clone())
        .increment(1);

    if let Some(parent_id) = &instance.parent_id {
        let child = SagaChildCompletedEvent {
            parent_instance_id: parent_id.clone(),
            child_instance_id: instance.id.clone(),
            result: result.clone(),
        };
        ctx.send(Envelope::from_contract(&child)?.with_header(SAGA_ID_HEADER, parent_id.as_str()));
    }

    let completed = SagaCompletedEvent {
        instance_id: instance.id.clone(),
        result,
    };
    ctx.send(Envelope::from_contract(&completed)?.with_header(SAGA_ID_HEADER, instance.id.as_str()));
    Ok(())
}
