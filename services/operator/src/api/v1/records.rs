//! Record endpoints, generic over the kind.
//!
//! PUT declares intent and never talks to the platform; the controller for
//! the kind picks the change up from the store. DELETE only requests
//! deletion, the record stays visible until its teardown finished.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::resources::{Record, RecordKey, Spec};
use crate::state::{AppState, HasStore};

pub fn routes<S: Spec>() -> Router<AppState>
where
    AppState: HasStore<S>,
{
    Router::new()
        .route("/", get(list_records::<S>))
        .route(
            "/{namespace}/{name}",
            get(get_record::<S>)
                .put(put_record::<S>)
                .delete(delete_record::<S>),
        )
        .route("/{namespace}/{name}/pause", post(pause_record::<S>))
        .route("/{namespace}/{name}/resume", post(resume_record::<S>))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub namespace: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(bound = "")]
pub struct ListRecordsResponse<S: Spec> {
    pub items: Vec<Record<S>>,
}

/// GET /v1/{kind}
async fn list_records<S: Spec>(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListRecordsResponse<S>>, ApiError>
where
    AppState: HasStore<S>,
{
    let mut items = HasStore::<S>::store(&state).list().await?;
    if let Some(namespace) = &query.namespace {
        items.retain(|record| &record.meta.namespace == namespace);
    }
    items.sort_by_key(|record| record.key());
    Ok(Json(ListRecordsResponse { items }))
}

/// GET /v1/{kind}/{namespace}/{name}
async fn get_record<S: Spec>(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Record<S>>, ApiError>
where
    AppState: HasStore<S>,
{
    let key = RecordKey::new(namespace, name);
    match HasStore::<S>::store(&state).get(&key).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::not_found(
            "record_not_found",
            format!("{} {key} does not exist", S::KIND),
        )
        .with_instance(key.to_string())),
    }
}

/// PUT /v1/{kind}/{namespace}/{name}
async fn put_record<S: Spec>(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    body: Result<Json<S>, JsonRejection>,
) -> Result<Json<Record<S>>, ApiError>
where
    AppState: HasStore<S>,
{
    let Json(spec) = body.map_err(|e| ApiError::bad_request("invalid_body", e.body_text()))?;
    let key = RecordKey::new(namespace, name);
    let record = HasStore::<S>::store(&state).apply(&key, spec).await?;
    info!(
        kind = %S::KIND,
        key = %key,
        generation = record.meta.generation,
        "Declared record"
    );
    Ok(Json(record))
}

/// DELETE /v1/{kind}/{namespace}/{name}
///
/// 202 with the record while its teardown runs, 204 when it was erased
/// right away.
async fn delete_record<S: Spec>(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiError>
where
    AppState: HasStore<S>,
{
    let key = RecordKey::new(namespace, name);
    let remaining = HasStore::<S>::store(&state).request_deletion(&key).await?;
    info!(kind = %S::KIND, key = %key, "Requested deletion");
    Ok(match remaining {
        Some(record) => (StatusCode::ACCEPTED, Json(record)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn pause_record<S: Spec>(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Record<S>>, ApiError>
where
    AppState: HasStore<S>,
{
    set_paused(&state, RecordKey::new(namespace, name), true).await
}

async fn resume_record<S: Spec>(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Record<S>>, ApiError>
where
    AppState: HasStore<S>,
{
    set_paused(&state, RecordKey::new(namespace, name), false).await
}

async fn set_paused<S: Spec>(
    state: &AppState,
    key: RecordKey,
    paused: bool,
) -> Result<Json<Record<S>>, ApiError>
where
    AppState: HasStore<S>,
{
    let record = HasStore::<S>::store(state).set_paused(&key, paused).await?;
    info!(kind = %S::KIND, key = %key, paused, "Changed pause state");
    Ok(Json(record))
}
