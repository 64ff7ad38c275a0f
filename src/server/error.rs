//! API error types.
//!
//! Client errors carry a readable message. Upstream failures are logged with
//! their detail and surface only as "service unavailable".

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::dispatch::SubmitError;
use crate::queue::BrokerError;
use crate::repository::DbError;
use crate::scheduler::ScheduleError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// Always rendered as plain "Unauthorized", whatever the cause.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    TooManyRequests(String),

    /// The detail is logged, never returned.
    #[error("service unavailable")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::TooManyRequests(_) => "too_many_requests",
            Self::ServiceUnavailable(_) => "service_unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::ServiceUnavailable(detail) = &self {
            tracing::error!("service unavailable: {}", detail);
        }
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        Self::ServiceUnavailable(format!("database: {}", e))
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        Self::ServiceUnavailable(format!("broker: {}", e))
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::DatasetNotFound(_) => Self::NotFound(e.to_string()),
            SubmitError::DatasetForbidden(_) | SubmitError::QuotaExceeded => {
                Self::Forbidden(e.to_string())
            }
            SubmitError::RateLimited(_) => Self::TooManyRequests(e.to_string()),
            SubmitError::Database(e) => e.into(),
            SubmitError::Broker(e) => e.into(),
            SubmitError::NoDatasets
            | SubmitError::MixedCategories
            | SubmitError::QualityFilterNeedsJson
            | SubmitError::UnsupportedOutputFormat(_)
            | SubmitError::Dispatch(_) => Self::BadRequest(e.to_string()),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::InvalidCrontab(_) | ScheduleError::InvalidInterval => {
                Self::BadRequest(e.to_string())
            }
            ScheduleError::Database(e) => e.into(),
            ScheduleError::Broker(e) => e.into(),
            ScheduleError::Store(e) => Self::ServiceUnavailable(format!("scheduler store: {}", e)),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_error_mapping() {
        let cases = [
            (SubmitError::DatasetNotFound("x".into()), StatusCode::NOT_FOUND),
            (SubmitError::DatasetForbidden("x".into()), StatusCode::FORBIDDEN),
            (SubmitError::QuotaExceeded, StatusCode::FORBIDDEN),
            (SubmitError::RateLimited(5), StatusCode::TOO_MANY_REQUESTS),
            (SubmitError::MixedCategories, StatusCode::BAD_REQUEST),
            (
                SubmitError::Database(DbError::NotFound),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_opaque_messages() {
        assert_eq!(ApiError::Unauthorized.to_string(), "Unauthorized");
        assert_eq!(
            ApiError::ServiceUnavailable("db locked at /var/lib".into()).to_string(),
            "service unavailable"
        );
    }
}
