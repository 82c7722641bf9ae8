use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// A single field-level validation failure, returned as part of a batch
/// rejection so the caller can see every offending document at once.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub value: serde_json::Value,
}

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("Validation failed for {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("Shard is read-only")]
    ReadOnly,

    #[error("Shard '{0}' is not configured")]
    NotConfigured(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shard '{0}' could not be resolved")]
    UnknownShard(String),

    #[error("Ingestion queue is full")]
    QueueFull,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ShardResult<T> = Result<T, ShardError>;

impl serde::Serialize for ShardError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl IntoResponse for ShardError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ShardError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ShardError::BadRequest(msg) | ShardError::Config(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ShardError::ReadOnly => (StatusCode::CONFLICT, self.to_string()),
            ShardError::UnknownShard(_) | ShardError::NotConfigured(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ShardError::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ShardError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            // Default to 500
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let details = match &self {
            ShardError::Validation(errors) => serde_json::to_value(errors).unwrap_or_default(),
            _ => serde_json::Value::Null,
        };

        let body = serde_json::json!({
            "error": message,
            "code": status.as_u16(),
            "details": details,
        });

        (status, Json(body)).into_response()
    }
}
