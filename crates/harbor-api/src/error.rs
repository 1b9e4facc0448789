//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use harbor_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// HTTP status for this error, also used as the admission status code
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Core(CoreError::InvalidReference { .. })
            | ApiError::Core(CoreError::InvalidPlatform(_)) => StatusCode::BAD_REQUEST,
            ApiError::Core(CoreError::NotReady(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::Core(_) | ApiError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotReady(_) | ApiError::Core(CoreError::NotReady(_)) => "NOT_READY",
            ApiError::Core(CoreError::InvalidReference { .. }) => "INVALID_REFERENCE",
            ApiError::Core(CoreError::InvalidPlatform(_)) => "INVALID_PLATFORM",
            ApiError::Internal(_) | ApiError::Core(_) | ApiError::Json(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(json!({
            "errors": [{
                "code": self.code(),
                "message": self.to_string(),
            }]
        }));

        (self.status(), body).into_response()
    }
}
