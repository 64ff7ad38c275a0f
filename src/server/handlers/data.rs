//! Submission, download and ingestion notification endpoints.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::super::auth::AuthenticatedUser;
use super::super::error::{ApiError, ApiResult};
use super::super::AppState;
use crate::models::RequestArgs;

/// Body of `POST /data`.
#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    #[serde(default)]
    pub request_name: Option<String>,
    #[serde(flatten)]
    pub args: RequestArgs,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: String,
    pub request_id: i32,
}

/// Queue an extraction. Answers 202 with the task id.
pub async fn submit(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<SubmitBody>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let name = body
        .request_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| body.args.datasets.join(","));

    let request = state
        .dispatcher
        .submit(&user, &name, body.args, Utc::now())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id: request.task_id,
            request_id: request.id,
        }),
    ))
}

fn not_found() -> ApiError {
    ApiError::NotFound("File not found".to_string())
}

/// Download an output file. Files that do not exist and files owned by
/// someone else are indistinguishable.
pub async fn download(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(not_found());
    }

    let output = state
        .ctx
        .file_outputs()
        .get_by_filename(&filename)
        .await?
        .filter(|o| o.user_id == user.id)
        .ok_or_else(not_found)?;

    let user_dir = state
        .settings
        .user_download_dir(user.id)
        .canonicalize()
        .map_err(|_| not_found())?;
    let file_path = user_dir
        .join(&output.filename)
        .canonicalize()
        .map_err(|_| not_found())?;
    if !file_path.starts_with(&user_dir) {
        return Err(not_found());
    }

    let content = tokio::fs::read(&file_path)
        .await
        .map_err(|e| ApiError::ServiceUnavailable(format!("read {}: {}", file_path.display(), e)))?;

    let mime = mime_guess::from_path(&file_path)
        .first_or_octet_stream()
        .to_string();
    let disposition = format!("attachment; filename=\"{}\"", output.filename);

    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response())
}

/// Body of `POST /data/ready`.
#[derive(Debug, Deserialize)]
pub struct DataReadyBody {
    pub dataset: String,
}

#[derive(Debug, Serialize)]
pub struct DataReadyResponse {
    pub dataset: String,
    pub fired: usize,
}

/// Ingestion notification: new data landed for a dataset. Fires every
/// enabled data-ready schedule covering it.
pub async fn data_ready(
    State(state): State<AppState>,
    AuthenticatedUser(_user): AuthenticatedUser,
    Json(body): Json<DataReadyBody>,
) -> ApiResult<(StatusCode, Json<DataReadyResponse>)> {
    if state.settings.find_dataset(&body.dataset).is_none() {
        return Err(ApiError::NotFound(format!(
            "Dataset not found: {}",
            body.dataset
        )));
    }

    let fired = state
        .registry
        .trigger_data_ready(&body.dataset, state.broker.as_ref())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataReadyResponse {
            dataset: body.dataset,
            fired,
        }),
    ))
}
