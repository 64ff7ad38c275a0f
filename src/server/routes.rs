//! Router configuration for the API server.

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth::auth_middleware;
use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Catalog
        .route("/datasets", get(handlers::list_datasets))
        .route("/datasets/:name", get(handlers::get_dataset))
        // Submission, ingestion notification and downloads
        .route("/data", post(handlers::submit))
        .route("/data/ready", post(handlers::data_ready))
        .route("/data/:filename", get(handlers::download))
        // Request ledger
        .route("/requests", get(handlers::list_requests))
        .route(
            "/requests/:id",
            get(handlers::get_request).delete(handlers::delete_request),
        )
        // Schedules
        .route(
            "/schedules",
            get(handlers::list_schedules).post(handlers::create_schedule),
        )
        .route(
            "/schedules/:id",
            patch(handlers::update_schedule).delete(handlers::delete_schedule),
        )
        // Account
        .route("/usage", get(handlers::usage))
        .route("/hourly", get(handlers::hourly))
        .route(
            "/access-key",
            get(handlers::get_access_key).post(handlers::regenerate_access_key),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
