use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("A load test is already running for scenario {0}")]
    AlreadyRunning(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),

    #[error("Run task failed: {0}")]
    Task(String),
}

pub type LoadResult<T> = Result<T, LoadError>;

impl LoadError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LoadError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        LoadError::NotFound(what.into())
    }
}

impl From<rusqlite::Error> for LoadError {
    fn from(e: rusqlite::Error) -> Self {
        LoadError::Persistence(e.into())
    }
}

impl IntoResponse for LoadError {
    fn into_response(self) -> Response {
        let status = match &self {
            LoadError::Validation(_) => StatusCode::BAD_REQUEST,
            LoadError::NotFound(_) => StatusCode::NOT_FOUND,
            LoadError::AlreadyRunning(_) => StatusCode::CONFLICT,
            LoadError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LoadError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
