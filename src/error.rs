//! Error handling

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures of the assessment / rate-limit / incident engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("assessment session not found")]
    SessionNotFound,

    #[error("assessment session already completed")]
    SessionCompleted,

    /// Time limit elapsed; the score is frozen at `score` percent
    #[error("assessment session expired (score frozen at {score})")]
    SessionExpired { score: i32 },

    #[error("item pool has {available} items, {requested} requested")]
    InsufficientItems { requested: usize, available: usize },

    #[error("too many attempts, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: i64 },

    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid session transition: {0}")]
    InvalidTransition(&'static str),

    #[error("export failed: {0}")]
    ExportFailed(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::StoreUnavailable(err.to_string())
    }
}

#[derive(Debug)]
pub enum AppError {
    // Auth errors
    TokenInvalid,
    Unauthorized,
    Forbidden,

    // Validation errors
    ValidationError(String),

    // Engine errors
    Engine(EngineError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, extra) = match &self {
            AppError::TokenInvalid => (StatusCode::UNAUTHORIZED, "Invalid token".to_string(), vec![]),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required".to_string(), vec![]),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Access denied".to_string(), vec![]),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone(), vec![]),
            AppError::Engine(err) => engine_status(err),
        };

        let mut body = json!({
            "error": error_message,
            "status": status.as_u16()
        });
        if let Some(map) = body.as_object_mut() {
            for (key, value) in extra {
                map.insert(key.to_string(), value);
            }
        }

        (status, Json(body)).into_response()
    }
}

type ErrorExtras = Vec<(&'static str, serde_json::Value)>;

fn engine_status(err: &EngineError) -> (StatusCode, String, ErrorExtras) {
    match err {
        EngineError::SessionNotFound => (StatusCode::NOT_FOUND, err.to_string(), vec![]),
        EngineError::SessionCompleted | EngineError::InvalidTransition(_) => {
            (StatusCode::CONFLICT, err.to_string(), vec![])
        }
        EngineError::SessionExpired { score } => {
            (StatusCode::GONE, "Assessment time limit reached".to_string(), vec![("score", json!(score))])
        }
        EngineError::InsufficientItems { .. } => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string(), vec![]),
        // same fields as an allowed login decision
        EngineError::RateLimited { retry_after_seconds } => (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many login attempts".to_string(),
            vec![
                ("allowed", json!(false)),
                ("remainingAttempts", json!(0)),
                ("retryAfterSeconds", json!(retry_after_seconds)),
            ],
        ),
        EngineError::StoreUnavailable(msg) => {
            tracing::error!("Record store error: {}", msg);
            (StatusCode::SERVICE_UNAVAILABLE, "Record store unavailable".to_string(), vec![])
        }
        EngineError::ExportFailed(msg) => {
            tracing::error!("Incident export error: {}", msg);
            (StatusCode::INTERNAL_SERVER_ERROR, "Export failed".to_string(), vec![])
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Engine(err)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AppError::TokenInvalid
    }
}
