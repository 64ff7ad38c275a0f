//! Authentication middleware and extractor.
//!
//! The middleware resolves the `Authorization` header through the credential
//! store and attaches the user to the request. Handlers that need a caller
//! take [`AuthenticatedUser`] as an argument; anonymous calls are rejected
//! there with 401. Handlers open to anyone take `Option<AuthenticatedUser>`.

use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;

use super::error::ApiError;
use super::AppState;
use crate::auth::Credentials;
use crate::models::User;

/// The caller, attached by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// Resolve credentials when present. A header that is present but malformed
/// or does not validate is rejected outright.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .map(|v| v.to_str().map(str::to_string));

    if let Some(value) = header {
        let value = value.map_err(|_| ApiError::Unauthorized)?;
        let credentials = Credentials::from_header(&value).ok_or(ApiError::Unauthorized)?;
        let user = state
            .credentials
            .authenticate(&credentials, Utc::now())
            .await?
            .ok_or(ApiError::Unauthorized)?;
        req.extensions_mut().insert(AuthenticatedUser(user));
    }

    Ok(next.run(req).await)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}
