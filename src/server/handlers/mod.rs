//! HTTP request handlers.

mod account;
mod data;
mod datasets;
mod requests;
mod schedules;

pub use account::{get_access_key, hourly, regenerate_access_key, usage};
pub use data::{data_ready, download, submit};
pub use datasets::{get_dataset, list_datasets};
pub use requests::{delete_request, get_request, list_requests};
pub use schedules::{create_schedule, delete_schedule, list_schedules, update_schedule};

use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Health check endpoint for container orchestration.
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}
