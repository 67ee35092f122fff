//! Per-instance mutual exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::{InstanceId, MutexError};

/// Backend-specific part of a held lock.
#[async_trait]
pub trait LockHandle: Send {
    /// Releases the lock.
    async fn unlock(self: Box<Self>) -> Result<(), MutexError>;
}

/// A held lock on one saga instance.
///
/// Dropping a lock without releasing it still frees it; backends decide how
/// (e.g. by closing the session that holds it).
pub struct InstanceLock {
    instance_id: InstanceId,
    acquired_at: Instant,
    handle: Box<dyn LockHandle>,
}

impl InstanceLock {
    /// Wraps a backend handle.
    pub fn new(instance_id: InstanceId, handle: Box<dyn LockHandle>) -> Self {
        Self {
            instance_id,
            acquired_at: Instant::now(),
            handle,
        }
    }

    /// The locked instance.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// How long the lock has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Releases the lock through its backend handle.
    pub async fn unlock(self) -> Result<(), MutexError> {
        self.handle.unlock().await
    }
}

impl std::fmt::Debug for InstanceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLock")
            .field("instance_id", &self.instance_id)
            .field("acquired_at", &self.acquired_at)
            .finish_non_exhaustive()
    }
}

/// Mutual exclusion keyed by saga instance id.
///
/// Implementations must guarantee exclusion across every process sharing
/// the same store, not merely within one process.
#[async_trait]
pub trait InstanceMutex: Send + Sync {
    /// Acquires the lock for `id`.
    ///
    /// Blocks until the lock is obtained, `timeout` elapses
    /// (`MutexError::Timeout`) or `cancel` fires (`MutexError::Cancelled`).
    /// On timeout or cancellation nothing stays held.
    async fn acquire(
        &self,
        id: &InstanceId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<InstanceLock, MutexError>;

    /// Releases a lock obtained from this mutex.
    async fn release(&self, lock: InstanceLock) -> Result<(), MutexError> {
        lock.unlock().await
    }
}

type LockTable = Arc<StdMutex<HashMap<InstanceId, Arc<Mutex<()>>>>>;

/// Process-local instance mutex.
///
/// Only excludes flows within one process. Use it with a store that is not
/// shared between processes, or in tests.
#[derive(Clone, Default)]
pub struct LocalInstanceMutex {
    locks: LockTable,
}

impl LocalInstanceMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instance ids with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Counts an acquire that gave up, by cause and backend.
pub(crate) fn record_failure(err: &MutexError, backend: &'static str) {
    match err {
        MutexError::Timeout { instance_id, timeout } => {
            tracing::debug!(%instance_id, ?timeout, backend, "instance lock timed out");
            metrics::counter!("saga_lock_timeouts_total", "backend" => backend).increment(1);
        }
        MutexError::Cancelled(_) => {
            metrics::counter!("saga_lock_cancellations_total", "backend" => backend).increment(1);
        }
        _ => {}
    }
}

/// Removes the entry for `id` when nobody holds or waits for it.
fn prune(locks: &LockTable, id: &InstanceId) {
    let mut table = locks.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(entry) = table.get(id)
        && Arc::strong_count(entry) == 1
    {
        table.remove(id);
    }
}

#[async_trait]
impl InstanceMutex for LocalInstanceMutex {
    async fn acquire(
        &self,
        id: &InstanceId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<InstanceLock, MutexError> {
        let entry = {
            let mut table = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            table.entry(id.clone()).or_default().clone()
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(MutexError::Cancelled(id.clone())),
            res = tokio::time::timeout(timeout, entry.lock_owned()) => res.map_err(|_| {
                MutexError::Timeout {
                    instance_id: id.clone(),
                    timeout,
                }
            }),
        };

        match outcome {
            Ok(guard) => Ok(InstanceLock::new(
                id.clone(),
                Box::new(LocalHandle {
                    instance_id: id.clone(),
                    guard: Some(guard),
                    locks: self.locks.clone(),
                }),
            )),
            Err(err) => {
                prune(&self.locks, id);
                record_failure(&err, "local");
                Err(err)
            }
        }
    }
}

struct LocalHandle {
    instance_id: InstanceId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
}

#[async_trait]
impl LockHandle for LocalHandle {
    async fn unlock(self: Box<Self>) -> Result<(), MutexError> {
        drop(self);
        Ok(())
    }
}

impl Drop for LocalHandle {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.locks, &self.instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn acquire_and_release() {
        let mutex = LocalInstanceMutex::new();
        let id = InstanceId::from("1");

        let lock = mutex
            .acquire(&id, WAIT, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(lock.instance_id(), &id);
        assert_eq!(mutex.tracked(), 1);

        mutex.release(lock).await.unwrap();
        assert_eq!(mutex.tracked(), 0);
    }

    #[tokio::test]
    async fn second_acquire_times_out_while_held() {
        let mutex = LocalInstanceMutex::new();
        let id = InstanceId::from("1");
        let cancel = CancellationToken::new();

        let held = mutex.acquire(&id, WAIT, &cancel).await.unwrap();
        let err = mutex
            .acquire(&id, Duration::from_millis(20), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MutexError::Timeout { .. }));

        mutex.release(held).await.unwrap();
        let again = mutex.acquire(&id, WAIT, &cancel).await.unwrap();
        mutex.release(again).await.unwrap();
    }

    #[tokio::test]
    async fn different_ids_do_not_block() {
        let mutex = LocalInstanceMutex::new();
        let cancel = CancellationToken::new();

        let a = mutex
            .acquire(&InstanceId::from("a"), WAIT, &cancel)
            .await
            .unwrap();
        let b = mutex
            .acquire(&InstanceId::from("b"), Duration::from_millis(20), &cancel)
            .await
            .unwrap();

        mutex.release(a).await.unwrap();
        mutex.release(b).await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_aborts_waiting_acquire() {
        let mutex = LocalInstanceMutex::new();
        let id = InstanceId::from("1");
        let held = mutex
            .acquire(&id, WAIT, &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let mutex = mutex.clone();
            let id = id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { mutex.acquire(&id, WAIT, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, MutexError::Cancelled(_)));

        mutex.release(held).await.unwrap();
        assert_eq!(mutex.tracked(), 0);
    }

    #[tokio::test]
    async fn dropped_lock_is_freed() {
        let mutex = LocalInstanceMutex::new();
        let id = InstanceId::from("1");
        let cancel = CancellationToken::new();

        drop(mutex.acquire(&id, WAIT, &cancel).await.unwrap());

        let lock = mutex
            .acquire(&id, Duration::from_millis(20), &cancel)
            .await
            .unwrap();
        mutex.release(lock).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_holders_never_overlap() {
        let mutex = LocalInstanceMutex::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let mutex = mutex.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            tasks.push(tokio::spawn(async move {
                let lock = mutex
                    .acquire(&InstanceId::from("shared"), WAIT, &CancellationToken::new())
                    .await
                    .unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                mutex.release(lock).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
