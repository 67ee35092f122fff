//! Read-only HTTP status routes backed by the saga store.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use saga_store::{HistoryEntry, InstanceFilter, InstanceId, SagaInstance, SagaState, SagaStore, StoreError};
use serde::Serialize;

/// Builds the status routes: `GET /sagas` and `GET /sagas/{id}`.
pub fn routes(store: Arc<dyn SagaStore>) -> Router {
    Router::new()
        .route("/sagas", get(list))
        .route("/sagas/{id}", get(get_one))
        .with_state(store)
}

/// Status routes placed under a mount point such as `"/"` or `"/admin"`.
pub fn mounted(mount: &str, store: Arc<dyn SagaStore>) -> Router {
    if mount == "/" {
        routes(store)
    } else {
        Router::new().nest(mount, routes(store))
    }
}

#[derive(Debug, Serialize)]
pub struct SagaStatusResponse {
    pub id: InstanceId,
    pub saga_type: String,
    pub parent_id: Option<InstanceId>,
    pub status: SagaState,
    pub payload: serde_json::Value,
    pub revision: i64,
    pub last_error: Option<String>,
    pub compensation_reason: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SagaInstance> for SagaStatusResponse {
    fn from(instance: SagaInstance) -> Self {
        Self {
            id: instance.id,
            saga_type: instance.saga_type,
            parent_id: instance.parent_id,
            status: instance.status,
            payload: instance.payload,
            revision: instance.revision.as_i64(),
            last_error: instance.last_error,
            compensation_reason: instance.compensation_reason,
            history: instance.history,
            started_at: instance.started_at,
            updated_at: instance.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SagaListResponse {
    pub sagas: Vec<SagaStatusResponse>,
    pub count: usize,
}

/// GET /sagas — lists instances matching the query filters.
#[tracing::instrument(skip(store))]
async fn list(
    State(store): State<Arc<dyn SagaStore>>,
    Query(filter): Query<InstanceFilter>,
) -> Result<Json<SagaListResponse>, StatusError> {
    let sagas: Vec<SagaStatusResponse> = store
        .list(filter)
        .await?
        .into_iter()
        .map(SagaStatusResponse::from)
        .collect();
    Ok(Json(SagaListResponse {
        count: sagas.len(),
        sagas,
    }))
}

/// GET /sagas/{id} — returns one instance's current state.
#[tracing::instrument(skip(store))]
async fn get_one(
    State(store): State<Arc<dyn SagaStore>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, StatusError> {
    let id = InstanceId::from(id);
    let instance = store
        .load(&id)
        .await?
        .ok_or(StatusError::NotFound(id))?;
    Ok(Json(instance.into()))
}

/// Status route error with HTTP response mapping.
#[derive(Debug)]
pub enum StatusError {
    NotFound(InstanceId),
    Store(StoreError),
}

impl From<StoreError> for StatusError {
    fn from(err: StoreError) -> Self {
        StatusError::Store(err)
    }
}

impl IntoResponse for StatusError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            StatusError::NotFound(id) => (StatusCode::NOT_FOUND, format!("Saga instance not found: {id}")),
            StatusError::Store(err) => {
                tracing::error!(error = %err, "saga store error");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
