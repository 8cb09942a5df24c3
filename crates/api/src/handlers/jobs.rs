//! Handlers for the `/jobs` resource.
//!
//! Every id taken from the request path goes through the dispatcher, which
//! refuses to probe the store for anything that fails the path-segment
//! check -- a traversal-shaped id simply reads as `unknown`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use posegrid_core::job::{JobKind, JobManifest, JobParams};
use posegrid_core::status::JobStatus;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job_type: String,
    pub params: JobParams,
}

/// POST /api/v1/jobs
///
/// Submit a new job. Returns 201 with the uploaded manifest; the id in it
/// is what all further queries key on.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    let kind = JobKind::from_name(&input.job_type)?;
    let manifest = state.dispatcher.submit(kind, input.params).await?;

    tracing::info!(job_id = %manifest.job_id, "Job submitted via API");

    Ok((StatusCode::CREATED, Json(DataResponse { data: manifest })))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// A local record paired with its live store status.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub manifest: JobManifest,
    pub status: JobStatus,
}

/// GET /api/v1/jobs
///
/// All locally recorded jobs, newest first, each with its live status.
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs: Vec<JobView> = state
        .dispatcher
        .list_with_status()
        .await?
        .into_iter()
        .map(|(manifest, status)| JobView { manifest, status })
        .collect();

    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// Response for a single-job status query.
#[derive(Debug, Serialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    /// The local record, when this workstation submitted the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<JobManifest>,
}

/// GET /api/v1/jobs/{id}
///
/// Live status for one id. Ids never submitted from this workstation still
/// resolve against the store; ids that fail sanitization come back as
/// `unknown` without touching the store.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let status = state.dispatcher.status(&job_id).await?;
    let manifest = state
        .dispatcher
        .list()
        .await?
        .into_iter()
        .find(|m| m.job_id == job_id);

    Ok(Json(DataResponse {
        data: JobStatusView {
            job_id,
            status,
            manifest,
        },
    }))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// Response for a download request.
#[derive(Debug, Serialize)]
pub struct DownloadView {
    pub job_id: String,
    /// Local paths of the downloaded files.
    pub files: Vec<String>,
}

/// POST /api/v1/jobs/{id}/download
///
/// Mirror `results/<id>/` into the workstation's working directory.
/// 404 when the job has no results yet.
pub async fn download_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let dest = state.dispatcher.data_dir().join("working");
    let files = state.dispatcher.download(&job_id, &dest).await?;

    Ok(Json(DataResponse {
        data: DownloadView {
            job_id,
            files: files.iter().map(|p| p.display().to_string()).collect(),
        },
    }))
}
