use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

// Use anyhow::Result for internal error handling
// Use thiserror for well-typed errors that need to be handled specifically

/// Application-specific errors that need special handling
#[derive(Error, Debug)]
pub enum AppError {
    /// Required request field missing or empty. Rejected before any
    /// provider-specific logic or network call runs.
    #[error("{0}")]
    Validation(String),

    /// Provider identifier is not one of the known set.
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Missing or malformed Authorization header on the task-status endpoint.
    #[error("Missing or invalid Authorization header")]
    Unauthorized,

    /// Non-2xx from an upstream provider. The raw body is carried verbatim
    /// as diagnostic text; the original status code is mirrored downstream.
    #[error("Provider API error: {status}")]
    Upstream {
        status: u16,
        details: String,
        provider: String,
        model: String,
    },

    /// A single malformed SSE/JSON record. Logged and skipped by the stream
    /// normalizer; must never abort an otherwise-healthy stream.
    #[error("Malformed stream record: {0}")]
    StreamParse(String),

    /// Transport or parse failure while polling a video task. Fatal to that
    /// poll loop, no automatic retry.
    #[error("Task polling failed: {0}")]
    TaskPoll(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Convert AppError to HTTP response
///
/// Error bodies follow the wire contract the browser client expects:
/// `{"error": ...}` for local failures, and
/// `{"error", "details", "provider", "model"}` for mirrored upstream errors.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            AppError::UnsupportedProvider(ref name) => {
                let msg = format!("Unsupported provider: {}", name);
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Missing or invalid Authorization header" })),
            )
                .into_response(),
            AppError::Upstream {
                status,
                details,
                provider,
                model,
            } => {
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let body = Json(json!({
                    "error": format!("Provider API error: {}", status.as_u16()),
                    "details": details,
                    "provider": provider,
                    "model": model,
                }));
                (status, body).into_response()
            }
            AppError::StreamParse(msg) | AppError::TaskPoll(msg) | AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": msg })),
            )
                .into_response(),
            AppError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": msg })),
            )
                .into_response(),
        }
    }
}

/// Convert from anyhow::Error to AppError for error context
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Log the full error chain for debugging
        tracing::error!("Application error: {:?}", err);
        AppError::Internal(err.to_string())
    }
}

/// Helper type for results that use anyhow for error handling
pub type AppResult<T> = Result<T, AppError>;
