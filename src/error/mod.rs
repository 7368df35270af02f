//! Application error types for robust error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors surfaced through HTTP.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Redis(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Redis error: {}", e),
            ),
            AppError::Serialization(e) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid payload: {}", e),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {}", e),
            ),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

impl From<RealtimeError> for AppError {
    fn from(e: RealtimeError) -> Self {
        let msg = e.to_string();
        match e {
            RealtimeError::InvalidIdentity(_) | RealtimeError::IdentityMismatch { .. } => {
                AppError::Validation(msg)
            }
            RealtimeError::Encode(inner) => AppError::Serialization(inner),
            RealtimeError::PushFailure { .. } => AppError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Errors from the presence and delivery core. None of them is fatal; the
/// registry stays consistent after any of them.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Empty or malformed user identity at registration.
    #[error("invalid user identity: {0}")]
    InvalidIdentity(String),

    /// A connection's identity is fixed at handshake.
    #[error("connection {connection} is already registered as {registered}")]
    IdentityMismatch {
        connection: String,
        registered: String,
    },

    /// Transport could not take a frame for one connection.
    #[error("push to connection {connection} failed: {reason}")]
    PushFailure {
        connection: String,
        reason: &'static str,
    },

    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
