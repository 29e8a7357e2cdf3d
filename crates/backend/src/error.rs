//! Unified error handling for the backend API.
//!
//! Handlers return [`ApiResult`] and use `?` freely; [`ApiError`] maps each
//! failure onto a status code and a `{error, details}` JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::oauth::OAuthError;
use crate::store::StoreError;

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Unified error type for API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Internal(#[from] anyhow::Error),

    /// Subscription store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or incomplete server configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No linked mailbox, or a state token that does not belong to the caller
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Google rejected a call we made on the user's behalf
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound(resource.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::InvalidState(msg) => ApiError::BadRequest(format!("invalid state: {msg}")),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) | ApiError::Store(_) | ApiError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Split into the client-facing message and optional details.
    /// Server-side failures are logged here and reported generically.
    fn into_body(self) -> ErrorResponse {
        let (error, details) = match self {
            ApiError::NotFound(resource) => (format!("{} not found", resource), None),
            ApiError::BadRequest(msg) | ApiError::Unauthorized(msg) => (msg, None),
            ApiError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                ("Google request failed".to_string(), Some(msg))
            }
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                ("Internal server error".to_string(), Some(e.to_string()))
            }
            ApiError::Store(e) => {
                tracing::error!("Store error: {}", e);
                ("Subscription store unavailable".to_string(), None)
            }
            ApiError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                ("Server configuration error".to_string(), None)
            }
        };

        ErrorResponse { error, details }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.into_body())).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
