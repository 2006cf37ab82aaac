use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use ferry_storage::{Project, ProjectId};
use serde::{Deserialize, Serialize};

use super::server::AppState;
use crate::error::{Error, Result};
use crate::security::{License, Principal};
use crate::staging::SessionToken;
use crate::transfer::{CommitRequest, ImportedProject, PrepareResult, ARCHIVE_CONTENT_TYPE};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub store: &'static str,
    pub staging_sessions: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store: state.transfer.store().backend_name(),
        staging_sessions: state.transfer.staging().active_sessions(),
    })
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn get_license(State(state): State<AppState>) -> Json<License> {
    Json(state.licenses.current())
}

pub async fn list_projects(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<Project>>> {
    state.transfer.list_projects(&principal).await.map(Json)
}

pub async fn export_project(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<ProjectId>,
) -> Result<Response> {
    let bytes = state.transfer.export_project(&principal, id).await?;
    let disposition = format!("attachment; filename=\"project-{}.ferry\"", id);
    Ok((
        [
            (header::CONTENT_TYPE, ARCHIVE_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct PrepareParams {
    #[serde(rename = "projectKey")]
    pub project_key: Option<String>,
}

/// POST /api/v2/project/import/prepare?projectKey=K with the raw archive as body
pub async fn prepare_import(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<PrepareParams>,
    body: Bytes,
) -> Result<Json<PrepareResult>> {
    let key = params
        .project_key
        .ok_or_else(|| Error::InvalidRequest("projectKey query parameter is required".to_string()))?;
    if body.is_empty() {
        return Err(Error::InvalidRequest("Archive body is empty".to_string()));
    }
    state
        .transfer
        .prepare_import(&principal, body, &key)
        .await
        .map(Json)
}

pub async fn commit_import(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(token): Path<String>,
    Json(request): Json<CommitRequest>,
) -> Result<Json<ImportedProject>> {
    let token = SessionToken::parse(&token)?;
    state
        .transfer
        .commit_import(&principal, &token, request)
        .await
        .map(Json)
}

pub async fn abandon_import(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(token): Path<String>,
) -> Result<StatusCode> {
    // A token that could never exist is already "destroyed".
    if let Ok(token) = SessionToken::parse(&token) {
        state.transfer.abandon_import(&principal, &token).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}
