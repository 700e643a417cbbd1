use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Terminal outcome of a metadata fetch, shared between single-flight waiters.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{0} not found upstream")]
    NotFound(String),

    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("gave up after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl AppError {
    /// Whether retrying the same request can succeed.
    ///
    /// Network failures, 5xx and 429 are transient; every other 4xx is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::HttpClient(e) => {
                if let Some(status) = e.status() {
                    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                } else {
                    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
                }
            }
            AppError::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Fetch(FetchError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Upstream { .. } | AppError::HttpClient(_) | AppError::Fetch(_) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
