use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Main error type for cache operations.
///
/// Variants carry rendered messages rather than source errors so the type is
/// `Clone`: a single-flight result is handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Corrupt cache entry: {0}")]
    CorruptEntry(String),

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Producer failed: {0}")]
    ProducerFailed(String),

    #[error("Cache is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl CacheError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownCategory(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ProducerFailed(_) => StatusCode::BAD_GATEWAY,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidConfig(_)
            | Self::IoError(_)
            | Self::CorruptEntry(_)
            | Self::CompressionError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Implement IntoResponse for Axum integration
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
