//! Handlers for the `/jobs` resource.
//!
//! Identity is carried by the `X-Owner-Id` header; authentication happens
//! upstream. The header is optional and only recorded on the job.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use vidgen_core::job::JobStatus;
use vidgen_core::parameters::GenerationRequest;
use vidgen_core::types::{JobId, OwnerId};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Header naming the submitting identity.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Body returned by submit and cancel.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn owner_id(headers: &HeaderMap) -> AppResult<Option<OwnerId>> {
    let Some(value) = headers.get(OWNER_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<OwnerId>().ok())
        .map(Some)
        .ok_or_else(|| AppError::BadRequest("X-Owner-Id must be an integer".to_string()))
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Validate and enqueue a generation request. Returns 202 with the new
/// job id; the job starts in `pending` and is picked up by the dispatcher.
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let owner_id = owner_id(&headers)?;
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let job_id = state.engine.submit(owner_id, request)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: JobStatusResponse {
                job_id,
                status: JobStatus::Pending,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.engine.status(job_id)?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a pending or processing job. Cancelling a finished job is not an
/// error: the response carries its existing terminal status.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let status = state.engine.cancel(job_id)?;
    Ok(Json(DataResponse {
        data: JobStatusResponse { job_id, status },
    }))
}
