//! Cross-process instance mutex on PostgreSQL advisory locks.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};
use tokio_util::sync::CancellationToken;

use crate::mutex::{InstanceLock, InstanceMutex, LockHandle, record_failure};
use crate::{InstanceId, MutexError};

const TRY_LOCK: &str = "SELECT pg_try_advisory_lock(hashtextextended($1, 0))";
const UNLOCK: &str = "SELECT pg_advisory_unlock(hashtextextended($1, 0))";

/// Instance mutex backed by PostgreSQL session advisory locks.
///
/// Every process sharing the database sees the same locks, so this mutex
/// excludes flows across processes. A lock is held by the pooled session
/// that took it; a lock dropped without release closes that session, which
/// makes the server free the lock.
#[derive(Clone)]
pub struct PostgresAdvisoryMutex {
    pool: PgPool,
    poll_interval: Duration,
}

impl PostgresAdvisoryMutex {
    /// Creates a mutex polling every 25ms while the lock is contended.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_millis(25),
        }
    }

    /// Sets the interval between lock attempts.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn lock(&self, id: &InstanceId) -> Result<AdvisoryHandle, MutexError> {
        let mut handle = AdvisoryHandle {
            instance_id: id.clone(),
            conn: Some(self.pool.acquire().await?),
            maybe_held: false,
        };

        loop {
            // The lock may be taken server-side even if this future is
            // dropped before the reply is read.
            handle.maybe_held = true;
            let locked: bool = sqlx::query_scalar(TRY_LOCK)
                .bind(id.as_str())
                .fetch_one(handle.connection()?)
                .await?;
            if locked {
                return Ok(handle);
            }
            handle.maybe_held = false;
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl InstanceMutex for PostgresAdvisoryMutex {
    async fn acquire(
        &self,
        id: &InstanceId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<InstanceLock, MutexError> {
        let acquired = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(MutexError::Cancelled(id.clone())),
            res = tokio::time::timeout(timeout, self.lock(id)) => match res {
                Ok(handle) => handle,
                Err(_) => Err(MutexError::Timeout {
                    instance_id: id.clone(),
                    timeout,
                }),
            },
        };
        let handle = acquired.inspect_err(|err| record_failure(err, "postgres"))?;

        tracing::trace!(instance_id = %id, "advisory lock acquired");
        Ok(InstanceLock::new(id.clone(), Box::new(handle)))
    }
}

struct AdvisoryHandle {
    instance_id: InstanceId,
    conn: Option<PoolConnection<Postgres>>,
    maybe_held: bool,
}

impl AdvisoryHandle {
    fn connection(&mut self) -> Result<&mut PgConnection, MutexError> {
        self.conn
            .as_deref_mut()
            .ok_or(MutexError::Database(sqlx::Error::PoolClosed))
    }
}

#[async_trait]
impl LockHandle for AdvisoryHandle {
    async fn unlock(mut self: Box<Self>) -> Result<(), MutexError> {
        let id = self.instance_id.clone();
        let released: bool = sqlx::query_scalar(UNLOCK)
            .bind(id.as_str())
            .fetch_one(self.connection()?)
            .await?;
        if !released {
            tracing::warn!(instance_id = %id, "advisory lock was not held at release");
        }
        self.maybe_held = false;
        Ok(())
    }
}

impl Drop for AdvisoryHandle {
    fn drop(&mut self) {
        if self.maybe_held
            && let Some(conn) = self.conn.take()
        {
            tracing::debug!(instance_id = %self.instance_id, "closing session to free advisory lock");
            drop(conn.detach());
        }
    }
}
