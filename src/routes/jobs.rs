use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use strum::Display;

use crate::app_state::AppState;
use crate::models::admin::{ErrorResponse, JobListing, ResetResponse};
use crate::models::job::{DrainSummary, JobStatusReport, StepSummary};
use crate::services::driver::EngineError;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Machine-readable error category in admin responses.
#[derive(Debug, Clone, Copy, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
enum ErrorKind {
    UnknownJob,
    Locked,
    Configuration,
    Store,
}

/// Map a job-level failure to a structured response.
fn engine_error(job: &str, err: EngineError) -> ApiError {
    let (status, kind) = match &err {
        EngineError::UnknownJob(_) => (StatusCode::NOT_FOUND, ErrorKind::UnknownJob),
        EngineError::LockHeld { .. } => (StatusCode::CONFLICT, ErrorKind::Locked),
        EngineError::Config(_) => (StatusCode::UNPROCESSABLE_ENTITY, ErrorKind::Configuration),
        EngineError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, ErrorKind::Store),
    };

    if status.is_server_error() {
        tracing::error!(job, error = %err, "Admin job request failed");
    } else {
        tracing::warn!(job, error = %err, "Admin job request rejected");
    }

    (
        status,
        Json(ErrorResponse {
            job: Some(job.to_string()),
            error: kind.to_string(),
            message: err.to_string(),
        }),
    )
}

/// GET /api/v1/jobs — registered jobs and their settings.
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobListing>> {
    let jobs = state
        .engine
        .registry()
        .iter()
        .map(|job| JobListing {
            job: job.name.clone(),
            collection: job.collection.clone(),
            page_size: job.settings.page_size,
            batch_quota: job.settings.batch_quota,
            lock_ttl_secs: job.settings.lock_ttl.as_secs(),
        })
        .collect();
    Json(jobs)
}

/// POST /api/v1/jobs/{job}/step — process one page.
pub async fn run_step(
    State(state): State<AppState>,
    Path(job): Path<String>,
) -> Result<Json<StepSummary>, ApiError> {
    state
        .engine
        .run_single_step(&job)
        .await
        .map(Json)
        .map_err(|e| engine_error(&job, e))
}

/// POST /api/v1/jobs/{job}/drain — run to the end of the collection.
pub async fn run_drain(
    State(state): State<AppState>,
    Path(job): Path<String>,
) -> Result<Json<DrainSummary>, ApiError> {
    state
        .engine
        .run_drain(&job)
        .await
        .map(Json)
        .map_err(|e| engine_error(&job, e))
}

/// GET /api/v1/jobs/{job}/status
pub async fn job_status(
    State(state): State<AppState>,
    Path(job): Path<String>,
) -> Result<Json<JobStatusReport>, ApiError> {
    state
        .engine
        .status(&job)
        .await
        .map(Json)
        .map_err(|e| engine_error(&job, e))
}

/// POST /api/v1/jobs/{job}/reset — restart the scan from the beginning.
pub async fn reset_job(
    State(state): State<AppState>,
    Path(job): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    state
        .engine
        .reset(&job)
        .await
        .map_err(|e| engine_error(&job, e))?;

    Ok(Json(ResetResponse {
        message: "Cursor and progress reset; next step starts a new pass".to_string(),
        job,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_conflict_maps_to_409() {
        let (status, Json(body)) = engine_error(
            "image-regeneration",
            EngineError::LockHeld {
                job: "image-regeneration".into(),
            },
        );
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.error, "locked");
        assert_eq!(body.job.as_deref(), Some("image-regeneration"));
    }

    #[test]
    fn test_unknown_job_maps_to_404() {
        let (status, Json(body)) = engine_error("nope", EngineError::UnknownJob("nope".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "unknown_job");
    }
}
