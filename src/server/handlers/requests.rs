//! Request ledger endpoints.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::super::auth::AuthenticatedUser;
use super::super::error::{ApiError, ApiResult};
use super::super::AppState;
use crate::models::{FileOutput, Request, User};
use crate::postprocess::remove_quietly;

/// A request together with its output file, if any.
#[derive(Debug, Serialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: Request,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<FileOutput>,
}

async fn owned_request(state: &AppState, user: &User, id: i32) -> ApiResult<Request> {
    state
        .ctx
        .requests()
        .get(id)
        .await?
        .filter(|r| r.user_id == user.id)
        .ok_or_else(|| ApiError::NotFound(format!("Request not found: {}", id)))
}

pub async fn list_requests(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Json<Vec<RequestView>>> {
    let mut outputs: HashMap<i32, FileOutput> = state
        .ctx
        .file_outputs()
        .list_for_user(user.id)
        .await?
        .into_iter()
        .map(|o| (o.request_id, o))
        .collect();

    let views = state
        .ctx
        .requests()
        .list_for_user(user.id)
        .await?
        .into_iter()
        .map(|request| RequestView {
            output: outputs.remove(&request.id),
            request,
        })
        .collect();

    Ok(Json(views))
}

pub async fn get_request(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i32>,
) -> ApiResult<Json<RequestView>> {
    let request = owned_request(&state, &user, id).await?;
    let output = state.ctx.file_outputs().get_for_request(id).await?;

    Ok(Json(RequestView { request, output }))
}

/// Revoke a request still in flight, or delete a finished one together with
/// its output file.
pub async fn delete_request(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i32>,
) -> ApiResult<Response> {
    let request = owned_request(&state, &user, id).await?;

    if !request.status.is_terminal() {
        state.dispatcher.revoke(&request).await?;
        let revoked = owned_request(&state, &user, id).await?;
        return Ok(Json(RequestView {
            request: revoked,
            output: None,
        })
        .into_response());
    }

    if let Some(output) = state.ctx.file_outputs().get_for_request(id).await? {
        remove_quietly(&state.settings.user_download_dir(user.id).join(&output.filename));
        state.ctx.file_outputs().delete(output.id).await?;
    }
    state.ctx.requests().delete(id).await?;
    tracing::info!(request_id = id, user_id = user.id, "request deleted");

    Ok(StatusCode::NO_CONTENT.into_response())
}
