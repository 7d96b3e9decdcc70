//! Error types for the canteen service
//!
//! `CoreError` is what the engines report; `ApiError` is its HTTP rendering.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::error::DatabaseError;
use serde_json::json;
use thiserror::Error;

/// Errors raised by the reconciliation, kiosk and statistics engines
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed or missing input; the caller can retry with corrected input
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced member or meal does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The toggle batch could not be committed; nothing was applied
    #[error("Failed to apply reservation changes: {0}")]
    ApplyFailed(#[source] DatabaseError),

    /// The kiosk could not write the attendance row
    #[error("Failed to record attendance: {0}")]
    RecordFailed(#[source] DatabaseError),

    /// A store read failed
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl CoreError {
    pub fn user_not_found(id: i16) -> Self {
        CoreError::NotFound {
            entity: "User",
            id: i64::from(id),
        }
    }

    pub fn meal_not_found(id: i16) -> Self {
        CoreError::NotFound {
            entity: "Meal",
            id: i64::from(id),
        }
    }
}

/// Custom error type for the HTTP layer
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing, invalid or expired credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// Authenticated but not allowed
    #[error("Forbidden")]
    Forbidden,

    /// Too many failed login attempts
    #[error("Too many attempts")]
    TooManyRequests,

    /// Bad request with message
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error
    #[error("Internal server error")]
    InternalServerError,

    /// Engine error
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            ApiError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many attempts, try again later".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            ApiError::Core(CoreError::Validation(msg)) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Core(err @ CoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::Core(err) => {
                tracing::error!("Request failed: {}", err);
                let message = match err {
                    CoreError::ApplyFailed(_) => "Could not save changes, please try again",
                    CoreError::RecordFailed(_) => "Could not record attendance",
                    _ => "Database error",
                };
                (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
