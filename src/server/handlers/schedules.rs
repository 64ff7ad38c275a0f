//! Recurring extraction endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::super::auth::AuthenticatedUser;
use super::super::error::{ApiError, ApiResult};
use super::super::AppState;
use crate::models::{RequestArgs, Schedule, ScheduleKind, User};
use crate::repository::NewScheduleSpec;

/// Body of `POST /schedules`.
#[derive(Debug, Deserialize)]
pub struct CreateScheduleBody {
    pub name: String,
    pub args: RequestArgs,
    pub schedule: ScheduleKind,
    #[serde(default)]
    pub on_data_ready: bool,
}

/// Body of `PATCH /schedules/:id`.
#[derive(Debug, Deserialize)]
pub struct UpdateScheduleBody {
    pub enabled: bool,
}

async fn owned_schedule(state: &AppState, user: &User, id: i32) -> ApiResult<Schedule> {
    state
        .ctx
        .schedules()
        .get(id)
        .await?
        .filter(|s| s.user_id == user.id)
        .ok_or_else(|| ApiError::NotFound(format!("Schedule not found: {}", id)))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<CreateScheduleBody>,
) -> ApiResult<(StatusCode, Json<Schedule>)> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Schedule name is required".to_string()));
    }
    let route = state.dispatcher.route_schedule(&user, &body.args).await?;

    let spec = NewScheduleSpec {
        user_id: user.id,
        name: body.name,
        args: body.args,
        kind: body.schedule,
        on_data_ready: body.on_data_ready,
    };
    let schedule = state.registry.register(&spec, &route, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn list_schedules(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Json<Vec<Schedule>>> {
    Ok(Json(state.ctx.schedules().list_for_user(user.id).await?))
}

/// Enable or disable a schedule.
pub async fn update_schedule(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(body): Json<UpdateScheduleBody>,
) -> ApiResult<Json<Schedule>> {
    let schedule = owned_schedule(&state, &user, id).await?;
    state.registry.set_enabled(&schedule, body.enabled).await?;

    Ok(Json(owned_schedule(&state, &user, id).await?))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i32>,
) -> ApiResult<StatusCode> {
    let schedule = owned_schedule(&state, &user, id).await?;
    state.registry.delete(&schedule).await?;

    Ok(StatusCode::NO_CONTENT)
}
