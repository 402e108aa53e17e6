//! Error types for starboard-sync
//!
//! [`MirrorError`] is what the core operations return; [`ApiError`] maps failures
//! onto HTTP responses for the trigger surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::external::ExternalError;
use crate::types::GuildId;

/// Failures of synchronizer, publisher and reconciliation operations
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    External(#[from] ExternalError),

    #[error(transparent)]
    Store(#[from] starboard_common::Error),

    /// Guild has no mirror channel set
    #[error("Guild {0} has no mirror channel configured")]
    NotConfigured(GuildId),

    #[error("A reconciliation job is already running for guild {0}")]
    JobAlreadyRunning(GuildId),

    /// Fast mode requested without a confirmed override
    #[error("Fast mode for guild {0} requires a confirmed override")]
    OverrideNotConfirmed(GuildId),

    #[error("Override challenge for guild {0} is missing, expired or was answered incorrectly")]
    InvalidChallenge(GuildId),
}

pub type MirrorResult<T> = Result<T, MirrorError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. job already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Override missing or challenge failed (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// External store unavailable (502)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<MirrorError> for ApiError {
    fn from(err: MirrorError) -> Self {
        match err {
            MirrorError::NotConfigured(_) => ApiError::BadRequest(err.to_string()),
            MirrorError::JobAlreadyRunning(_) => ApiError::Conflict(err.to_string()),
            MirrorError::OverrideNotConfirmed(_) | MirrorError::InvalidChallenge(_) => {
                ApiError::Forbidden(err.to_string())
            }
            MirrorError::External(ExternalError::NotFound { .. }) => {
                ApiError::NotFound(err.to_string())
            }
            MirrorError::External(_) => ApiError::Upstream(err.to_string()),
            MirrorError::Store(e) => e.into(),
        }
    }
}

impl From<starboard_common::Error> for ApiError {
    fn from(err: starboard_common::Error) -> Self {
        match err {
            starboard_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::Forbidden(msg)
            | ApiError::Upstream(msg)
            | ApiError::Internal(msg) => msg,
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
