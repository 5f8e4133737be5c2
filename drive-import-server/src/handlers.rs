//! Route handlers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use drive_import::{
    ImportRequest, ImportRunnerPayload, ImportTask, RunId, RunOutcome, TaskOutcome, TaskStatus,
};

use crate::auth::Session;
use crate::error::{AppError, AppResult};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartImportBody {
    #[serde(alias = "driveUrl")]
    pub drive_folder_id: String,
    #[serde(default)]
    pub course_id: Option<String>,
    /// Plan only; nothing is written.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    pub task: ImportTask,
    pub course_id: String,
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub success: bool,
    pub status: TaskStatus,
    pub results: TaskOutcome,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub drive_url: String,
    #[serde(default)]
    pub course_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub run_id: String,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /import-from-drive`
pub async fn start_import(
    State(state): State<Arc<AppState>>,
    Session(principal): Session,
    Json(body): Json<StartImportBody>,
) -> AppResult<Response> {
    if body.drive_folder_id.trim().is_empty() {
        return Err(AppError::bad_request("driveFolderId is required"));
    }
    let request = ImportRequest {
        folder: body.drive_folder_id,
        course_id: body.course_id.filter(|c| !c.trim().is_empty()),
    };

    if body.dry_run {
        if !principal.can_import() {
            return Err(AppError::forbidden("only admins and instructors can import courses"));
        }
        let plan = state.orchestrator.plan(&request).await?;
        return Ok(Json(plan).into_response());
    }

    let response = match state.orchestrator.start(&request, &principal).await? {
        RunOutcome::Finished(report) => (StatusCode::OK, Json(report)).into_response(),
        RunOutcome::Continuing(report) => (StatusCode::ACCEPTED, Json(report)).into_response(),
    };
    Ok(response)
}

/// `POST /import-from-drive-runner`
pub async fn continue_import(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ImportRunnerPayload>,
) -> AppResult<Response> {
    let entry = state.orchestrator.accept_continuation(&payload).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "queued": true,
            "runId": payload.run_id(),
            "entryId": entry.0,
        })),
    )
        .into_response())
}

/// `POST /import-from-drive/item`
pub async fn import_item(
    State(state): State<Arc<AppState>>,
    Session(principal): Session,
    Json(body): Json<ItemBody>,
) -> AppResult<Json<ItemResponse>> {
    if body.course_id.trim().is_empty() {
        return Err(AppError::bad_request("courseId is required"));
    }
    let outcome = state
        .orchestrator
        .execute_single(&body.task, &body.course_id, &principal)
        .await?;
    Ok(Json(ItemResponse {
        success: outcome.is_done(),
        status: outcome.status,
        results: outcome,
    }))
}

/// `GET /import-from-drive/list`
pub async fn list_import(
    State(state): State<Arc<AppState>>,
    Session(_principal): Session,
    Query(query): Query<ListQuery>,
) -> AppResult<Response> {
    let request = ImportRequest {
        folder: query.drive_url,
        course_id: query.course_id.filter(|c| !c.trim().is_empty()),
    };
    let plan = state.orchestrator.plan(&request).await?;
    Ok(Json(plan).into_response())
}

/// `GET /import-from-drive-status`
pub async fn import_status(
    State(state): State<Arc<AppState>>,
    Session(_principal): Session,
    Query(query): Query<StatusQuery>,
) -> AppResult<Response> {
    let run_id: RunId = query
        .run_id
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid runId: {}", query.run_id)))?;
    let report = state.orchestrator.status(run_id).await?;
    Ok(Json(report).into_response())
}
