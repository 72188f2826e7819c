//! Secret and config map writes.
//!
//! Values are write-only over HTTP; nothing here reads them back.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::put,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use crate::api::error::ApiError;
use crate::secrets::{ObjectClass, SecretData};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/{namespace}/{name}", put(put_secret))
}

#[derive(Debug, Deserialize)]
pub struct PutSecretRequest {
    pub data: SecretData,
}

/// PUT /v1/secrets/{namespace}/{name}
async fn put_secret(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    body: Result<Json<PutSecretRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request("invalid_body", e.body_text()))?;
    let keys = request.data.len();
    state
        .secrets()
        .put(ObjectClass::Secret, &namespace, &name, request.data)
        .await?;
    info!(namespace = %namespace, name = %name, keys, "Stored secret");
    Ok(StatusCode::NO_CONTENT)
}
