//! One-shot commands queued on a record.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::api::error::ApiError;
use crate::resources::{Command, RecordKey, RunType};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    pub run_type: RunType,
    #[serde(default)]
    pub terraform_version: Option<String>,
}

/// Queue a run on a workspace.
///
/// POST /v1/workspaces/{namespace}/{name}/runs
pub async fn start_run(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    body: Result<Json<StartRunRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request("invalid_body", e.body_text()))?;
    let key = RecordKey::new(namespace, name);
    state
        .stores()
        .workspaces
        .push_command(
            &key,
            Command::Run {
                run_type: request.run_type,
                terraform_version: request.terraform_version,
            },
        )
        .await?;
    info!(key = %key, run_type = ?request.run_type, "Queued run command");
    Ok(StatusCode::ACCEPTED)
}

/// Re-upload a module's configuration and run it again.
///
/// POST /v1/modules/{namespace}/{name}/restart
pub async fn restart_module(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let key = RecordKey::new(namespace, name);
    state
        .stores()
        .modules
        .push_command(&key, Command::Restart)
        .await?;
    info!(key = %key, "Queued restart command");
    Ok(StatusCode::ACCEPTED)
}
