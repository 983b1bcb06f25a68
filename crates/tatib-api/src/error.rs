use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tatib_db::{Constraint, constraint_violation};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Dependency(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Map a store error, turning the constraint rejections the store
    /// enforces into the matching caller-facing error.
    pub fn from_store(err: anyhow::Error, on_unique: &str, on_foreign_key: &str) -> Self {
        match constraint_violation(&err) {
            Some(Constraint::Unique) => Self::Conflict(on_unique.to_string()),
            Some(Constraint::ForeignKey) => Self::NotFound(on_foreign_key.to_string()),
            _ => Self::Dependency(err),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Dependency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Dependency(e) => {
                error!("Dependency failure: {:#}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
