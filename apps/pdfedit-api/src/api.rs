//! API handlers for the pdfedit server
//!
//! Provides REST endpoints for:
//! - PDF upload and page metadata
//! - Applying an edit manifest as a job
//! - Job status and output download

use std::path::Path as FsPath;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use pdfedit_core::{apply, get_page_sizes, JobStatus, Manifest, PdfDocument};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::state::AppState;
use crate::storage::{read_optional, Storage};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    /// Jobs tracked since startup
    pub jobs: usize,
}

/// Handler: GET /health
pub async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "pdfedit-api",
        version: env!("CARGO_PKG_VERSION"),
        jobs: state.jobs.len(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: String,
}

/// Handler: POST /api/uploads
///
/// Expects a multipart form with the PDF in a `file` field.
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if !file_name.to_lowercase().ends_with(".pdf") {
            return Err(ServerError::InvalidRequest(
                "Only PDF uploads are supported".into(),
            ));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServerError::InvalidRequest(format!("Failed to read upload: {}", e)))?;
        if bytes.is_empty() {
            return Err(ServerError::InvalidRequest("Uploaded file is empty".into()));
        }

        let file_id = state.storage.save_upload(&bytes).await?;
        info!("Upload {}: {} ({} bytes)", file_id, file_name, bytes.len());
        return Ok(Json(UploadResponse { file_id }));
    }

    Err(ServerError::InvalidRequest(
        "Missing multipart field 'file'".into(),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetaResponse {
    pub file_id: String,
    pub page_count: usize,
    /// `[width, height]` per page, in points
    pub page_sizes: Vec<(f64, f64)>,
}

async fn load_upload(storage: &Storage, file_id: &str) -> Result<Vec<u8>, ServerError> {
    storage
        .read(file_id)
        .await?
        .ok_or_else(|| ServerError::FileNotFound(file_id.to_string()))
}

/// Handler: GET /api/files/:file_id/meta
pub async fn handle_file_meta(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<FileMetaResponse>, ServerError> {
    let bytes = load_upload(&state.storage, &file_id).await?;
    let page_sizes = tokio::task::spawn_blocking(move || get_page_sizes(&bytes))
        .await?
        .map_err(ServerError::Unreadable)?;

    Ok(Json(FileMetaResponse {
        file_id,
        page_count: page_sizes.len(),
        page_sizes,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResponse {
    pub job_id: String,
}

/// Handler: POST /api/files/:file_id/apply
///
/// Runs the manifest on the blocking pool and answers once the job finishes.
pub async fn handle_apply(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    manifest: Result<Json<Manifest>, JsonRejection>,
) -> Result<Json<ApplyResponse>, ServerError> {
    let bytes = load_upload(&state.storage, &file_id).await?;

    let Json(manifest) = manifest.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    manifest.validate().map_err(ServerError::InvalidManifest)?;

    let job_id = Storage::new_id();
    state.jobs.create(&job_id);
    state
        .jobs
        .set_status(&job_id, JobStatus::Processing, None, None);
    info!("Job {}: applying manifest to file {}", job_id, file_id);

    let result = tokio::task::spawn_blocking(move || {
        PdfDocument::open(&bytes).and_then(|doc| apply(doc, &manifest))
    })
    .await;

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            warn!("Job {} failed: {}", job_id, err);
            state
                .jobs
                .set_status(&job_id, JobStatus::Failed, Some(err.to_string()), None);
            return Err(ServerError::JobFailed {
                job_id,
                source: err,
            });
        }
        Err(join_err) => {
            state.jobs.set_status(
                &job_id,
                JobStatus::Failed,
                Some(format!("Worker task failed: {}", join_err)),
                None,
            );
            return Err(join_err.into());
        }
    };

    let path = match state.storage.write_output(&job_id, &output).await {
        Ok(path) => path,
        Err(err) => {
            state.jobs.set_status(
                &job_id,
                JobStatus::Failed,
                Some(format!("Failed to store output: {}", err)),
                None,
            );
            return Err(err.into());
        }
    };

    state.jobs.set_status(
        &job_id,
        JobStatus::Completed,
        None,
        Some(path.to_string_lossy().into_owned()),
    );
    info!("Job {} completed ({} bytes)", job_id, output.len());
    Ok(Json(ApplyResponse { job_id }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Handler: GET /api/jobs/:job_id
pub async fn handle_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ServerError> {
    let job = state
        .jobs
        .get(&job_id)
        .ok_or_else(|| ServerError::JobNotFound(job_id.clone()))?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        message: job.message,
        created_at: job.created_at,
        updated_at: job.updated_at,
    }))
}

/// Handler: GET /api/jobs/:job_id/download
pub async fn handle_download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let job = state
        .jobs
        .get(&job_id)
        .ok_or_else(|| ServerError::JobNotFound(job_id.clone()))?;

    let output = match (job.status, job.output) {
        (JobStatus::Completed, Some(output)) => output,
        (status, _) => {
            debug!("Download of job {} refused: status {}", job_id, status);
            return Err(ServerError::JobNotCompleted(job_id));
        }
    };

    let bytes = read_optional(FsPath::new(&output))
        .await?
        .ok_or_else(|| ServerError::FileNotFound(format!("output of job {}", job_id)))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"edited-{}.pdf\"", job_id),
            ),
        ],
        Bytes::from(bytes),
    ))
}
