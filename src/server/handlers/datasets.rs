//! Dataset catalog endpoints.

use axum::extract::{Path, State};
use axum::Json;

use super::super::auth::AuthenticatedUser;
use super::super::error::{ApiError, ApiResult};
use super::super::AppState;
use crate::models::DatasetView;

async fn granted_datasets(state: &AppState, user: Option<&AuthenticatedUser>) -> ApiResult<Vec<String>> {
    match user {
        Some(AuthenticatedUser(user)) => Ok(state.ctx.users().authorized_datasets(user.id).await?),
        None => Ok(Vec::new()),
    }
}

/// List the catalog as seen by the caller. Anonymous callers see every
/// dataset but are authorized only for public ones.
pub async fn list_datasets(
    State(state): State<AppState>,
    user: Option<AuthenticatedUser>,
) -> ApiResult<Json<Vec<DatasetView>>> {
    let granted = granted_datasets(&state, user.as_ref()).await?;

    let views = state
        .settings
        .datasets
        .iter()
        .map(|d| DatasetView::new(d, granted.contains(&d.name)))
        .collect();

    Ok(Json(views))
}

pub async fn get_dataset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    user: Option<AuthenticatedUser>,
) -> ApiResult<Json<DatasetView>> {
    let dataset = state
        .settings
        .find_dataset(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Dataset not found: {}", name)))?;
    let granted = granted_datasets(&state, user.as_ref()).await?;

    Ok(Json(DatasetView::new(dataset, granted.contains(&dataset.name))))
}
