use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::generator::GeneratorError;
use crate::query::QueryError;
use crate::storage::StorageError;
use taskflow_models::ApiResponse;

/// Failure surfaced by a handler, rendered as `{message, success: false}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{message}")]
    Failure { status: StatusCode, message: String },
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn task_not_found() -> Self {
        ApiError::NotFound("Task not found".to_string())
    }

    /// Map a store error for an endpoint whose persistence failures answer
    /// with `failure_status` (500 on most paths, 400 on create).
    pub fn from_storage(err: StorageError, failure_status: StatusCode, context: &str) -> Self {
        match err {
            StorageError::NotFound => ApiError::task_not_found(),
            StorageError::Invalid(msg) => ApiError::Validation(msg),
            other => {
                tracing::error!(error = %other, "{}", context);
                ApiError::Failure {
                    status: failure_status,
                    message: context.to_string(),
                }
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Failure { status, .. } => *status,
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::Validation(err.0)
    }
}

impl From<GeneratorError> for ApiError {
    fn from(err: GeneratorError) -> Self {
        match err {
            GeneratorError::Invalid(msg) => ApiError::Validation(msg),
            GeneratorError::NotConfigured => ApiError::Failure {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "Task generation is not configured".to_string(),
            },
            other => {
                tracing::warn!(error = %other, "task generation failed");
                ApiError::Failure {
                    status: StatusCode::BAD_GATEWAY,
                    message: "Task generation failed".to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ApiResponse::message(self.to_string(), false))).into_response()
    }
}
