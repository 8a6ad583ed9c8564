//! Error types for the pdfedit server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pdfedit_core::OperationError;
use serde::Serialize;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job not completed: {0}")]
    JobNotCompleted(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Manifest rejected before any job was created
    #[error(transparent)]
    InvalidManifest(OperationError),

    /// Stored file is not a readable PDF
    #[error("Unreadable PDF: {0}")]
    Unreadable(OperationError),

    /// The edit job ran and failed
    #[error("Job {job_id} failed: {source}")]
    JobFailed {
        job_id: String,
        source: OperationError,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    success: bool,
    error: String,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
}

fn operation_status(err: &OperationError) -> (StatusCode, &'static str) {
    if err.is_validation() {
        (StatusCode::BAD_REQUEST, "INVALID_MANIFEST")
    } else {
        (StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE_PDF")
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let mut job_id = None;
        let (status, code) = match &self {
            ServerError::FileNotFound(_) => (StatusCode::NOT_FOUND, "FILE_NOT_FOUND"),
            ServerError::JobNotFound(_) => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
            ServerError::JobNotCompleted(_) => (StatusCode::BAD_REQUEST, "JOB_NOT_COMPLETED"),
            ServerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ServerError::InvalidManifest(_) => (StatusCode::BAD_REQUEST, "INVALID_MANIFEST"),
            ServerError::Unreadable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE_PDF"),
            ServerError::JobFailed { job_id: id, source } => {
                job_id = Some(id.clone());
                operation_status(source)
            }
            ServerError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let error = match &self {
            ServerError::JobFailed { source, .. } => source.to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            success: false,
            error,
            code: code.to_string(),
            job_id,
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(format!("Storage error: {}", err))
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServerError::Internal(format!("Worker task failed: {}", err))
    }
}
