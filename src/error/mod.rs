use crate::rate_limit::counter::CounterError;
use crate::settings::ConfigSourceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::num::ParseIntError;
use thiserror::Error;

/// Result type for limiter operations
pub type Result<T> = std::result::Result<T, LimiterError>;

/// Limiter error types
#[derive(Error, Debug)]
pub enum LimiterError {
    #[error("Failed to read threshold setting: {0}")]
    ConfigRead(#[from] ConfigSourceError),

    #[error("Invalid threshold value {value:?}: {source}")]
    ConfigParse {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Window counter backend error: {0}")]
    CounterBackend(#[from] CounterError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl LimiterError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            LimiterError::ConfigRead(_) => StatusCode::SERVICE_UNAVAILABLE,
            LimiterError::ConfigParse { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::CounterBackend(_) => StatusCode::SERVICE_UNAVAILABLE,
            LimiterError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::Http(_) => StatusCode::BAD_GATEWAY,
            LimiterError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            LimiterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
