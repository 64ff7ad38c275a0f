//! Account endpoints: quota, hourly allowance and access key.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::super::auth::AuthenticatedUser;
use super::super::error::{ApiError, ApiResult};
use super::super::AppState;
use crate::models::AccessKey;

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// Quota in bytes; zero or less is unlimited.
    pub quota: i64,
    pub used: i64,
}

pub async fn usage(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Json<UsageResponse>> {
    let used = state.ctx.users().used_space(user.id).await?;
    Ok(Json(UsageResponse {
        quota: user.disk_quota,
        used,
    }))
}

#[derive(Debug, Serialize)]
pub struct HourlyResponse {
    /// Zero means unlimited.
    pub limit: i32,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
}

/// Submissions in the trailing hour against the user's allowance.
pub async fn hourly(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Json<HourlyResponse>> {
    let count = state
        .ctx
        .requests()
        .count_submitted_since(user.id, Utc::now() - Duration::hours(1))
        .await?;
    let remaining = user
        .is_rate_limited()
        .then(|| (i64::from(user.max_requests_per_hour) - count).max(0));

    Ok(Json(HourlyResponse {
        limit: user.max_requests_per_hour,
        count,
        remaining,
    }))
}

pub async fn get_access_key(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Json<AccessKey>> {
    state
        .credentials
        .current_key(user.id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No access key".to_string()))
}

/// Optional body of `POST /access-key`.
#[derive(Debug, Default, Deserialize)]
pub struct RegenerateBody {
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Issue a new key. The previous key stops working immediately.
pub async fn regenerate_access_key(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    body: Option<Json<RegenerateBody>>,
) -> ApiResult<Json<AccessKey>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    if body.expiration.is_some_and(|e| e <= Utc::now()) {
        return Err(ApiError::BadRequest("Expiration must be in the future".to_string()));
    }

    let key = state
        .credentials
        .regenerate(user.id, body.expiration, body.scope)
        .await?;
    Ok(Json(key))
}
