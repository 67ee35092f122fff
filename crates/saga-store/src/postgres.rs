use std::sync::Arc;

use async_trait::async_trait;
use bus::MessageCodec;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    HistoryEntry, InstanceFilter, InstanceId, Result, Revision, SagaInstance, SagaState,
    StoreError,
    store::{SagaStore, StoreFactory},
};

const SELECT_COLUMNS: &str = "SELECT id, saga_type, parent_id, status, revision, payload, history, last_error, compensation_reason, started_at, updated_at FROM saga_instances";

/// PostgreSQL-backed saga store.
///
/// The process payload and history are stored encoded with the bus codec.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
    codec: Arc<dyn MessageCodec>,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool, codec: Arc<dyn MessageCodec>) -> Self {
        Self { pool, codec }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_instance(&self, row: PgRow) -> Result<SagaInstance> {
        let id = InstanceId::from(row.try_get::<String, _>("id")?);

        let status: String = row.try_get("status")?;
        let status: SagaState = status.parse().map_err(|e: common::UnknownSagaState| {
            StoreError::Corrupt {
                instance_id: id.clone(),
                reason: e.to_string(),
            }
        })?;

        let payload_bytes: Vec<u8> = row.try_get("payload")?;
        let history_bytes: Vec<u8> = row.try_get("history")?;
        let history: Vec<HistoryEntry> =
            serde_json::from_value(self.codec.decode(&history_bytes)?)?;

        Ok(SagaInstance {
            id,
            saga_type: row.try_get("saga_type")?,
            parent_id: row
                .try_get::<Option<String>, _>("parent_id")?
                .map(InstanceId::from),
            status,
            payload: self.codec.decode(&payload_bytes)?,
            revision: Revision::new(row.try_get("revision")?),
            last_error: row.try_get("last_error")?,
            compensation_reason: row.try_get("compensation_reason")?,
            history,
            started_at: row.try_get("started_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn stored_revision(&self, id: &InstanceId) -> Result<Revision> {
        let revision: Option<i64> =
            sqlx::query_scalar("SELECT revision FROM saga_instances WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(revision.map(Revision::new).unwrap_or_default())
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn load(&self, id: &InstanceId) -> Result<Option<SagaInstance>> {
        let row: Option<PgRow> = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.row_to_instance(row)).transpose()
    }

    async fn save(&self, instance: &SagaInstance) -> Result<Revision> {
        let payload = self.codec.encode(&instance.payload)?;
        let history = self
            .codec
            .encode(&serde_json::to_value(&instance.history)?)?;
        let next = instance.revision.next();

        let result = if instance.revision == Revision::initial() {
            sqlx::query(
                r#"
                INSERT INTO saga_instances
                    (id, saga_type, parent_id, status, revision, payload, history, last_error, compensation_reason, started_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(instance.id.as_str())
            .bind(&instance.saga_type)
            .bind(instance.parent_id.as_ref().map(InstanceId::as_str))
            .bind(instance.status.as_str())
            .bind(next.as_i64())
            .bind(payload)
            .bind(history)
            .bind(&instance.last_error)
            .bind(&instance.compensation_reason)
            .bind(instance.started_at)
            .bind(instance.updated_at)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE saga_instances SET
                    saga_type = $2,
                    parent_id = $3,
                    status = $4,
                    revision = $5,
                    payload = $6,
                    history = $7,
                    last_error = $8,
                    compensation_reason = $9,
                    updated_at = $10
                WHERE id = $1 AND revision = $11
                "#,
            )
            .bind(instance.id.as_str())
            .bind(&instance.saga_type)
            .bind(instance.parent_id.as_ref().map(InstanceId::as_str))
            .bind(instance.status.as_str())
            .bind(next.as_i64())
            .bind(payload)
            .bind(history)
            .bind(&instance.last_error)
            .bind(&instance.compensation_reason)
            .bind(instance.updated_at)
            .bind(instance.revision.as_i64())
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::RevisionConflict {
                instance_id: instance.id.clone(),
                expected: instance.revision,
                actual: self.stored_revision(&instance.id).await?,
            });
        }

        Ok(next)
    }

    async fn list(&self, filter: InstanceFilter) -> Result<Vec<SagaInstance>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if filter.saga_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND saga_type = ${param_count}"));
        }
        if filter.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if filter.parent_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND parent_id = ${param_count}"));
        }

        sql.push_str(" ORDER BY started_at ASC, id ASC");

        if filter.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if filter.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut query = sqlx::query(&sql);

        if let Some(saga_type) = filter.saga_type {
            query = query.bind(saga_type);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(parent_id) = filter.parent_id {
            query = query.bind(parent_id.into_inner());
        }
        if let Some(limit) = filter.limit {
            query = query.bind(sql_bound(limit));
        }
        if let Some(offset) = filter.offset {
            query = query.bind(sql_bound(offset));
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| self.row_to_instance(row))
            .collect()
    }
}

/// Factory producing [`PostgresSagaStore`]s over a shared pool.
#[derive(Clone)]
pub struct PostgresStoreFactory {
    pool: PgPool,
    migrate: bool,
}

impl PostgresStoreFactory {
    /// Creates a factory. Migrations are not run.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            migrate: false,
        }
    }

    /// Runs the store migrations when the store is created.
    pub fn with_migrations(mut self) -> Self {
        self.migrate = true;
        self
    }
}

#[async_trait]
impl StoreFactory for PostgresStoreFactory {
    async fn create(&self, codec: Arc<dyn MessageCodec>) -> Result<Arc<dyn SagaStore>> {
        let store = PostgresSagaStore::new(self.pool.clone(), codec);
        if self.migrate {
            store.run_migrations().await?;
        }
        Ok(Arc::new(store))
    }
}

/// Converts a page bound to BIGINT, saturating values Postgres cannot hold.
fn sql_bound(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
