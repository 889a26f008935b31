//! Handlers for the `/evaluations` resource (PRD-01, PRD-02).
//!
//! Submission stages the uploads and returns immediately with a job id and
//! correlation token; callers poll the status/result endpoints or the
//! token-addressed task endpoints.

use axum::extract::{Multipart, Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use evalhub_core::error::CoreError;
use evalhub_core::types::DbId;
use evalhub_db::models::job::{Job, JobListQuery};
use evalhub_db::models::status::JobStatus;
use evalhub_db::repositories::JobRepo;
use evalhub_pipeline::staging::{self, StageRequest, UploadedFile};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn find_job(pool: &sqlx::PgPool, job_id: DbId) -> AppResult<Job> {
    JobRepo::find_by_id(pool, job_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: job_id,
        }))
}

async fn read_file_field(field: axum::extract::multipart::Field<'_>) -> AppResult<UploadedFile> {
    let filename = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest("File field must include a filename".to_string()))?;
    let bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {e}")))?;
    Ok(UploadedFile {
        filename,
        bytes: bytes.to_vec(),
    })
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read form field: {e}")))
}

fn require<T>(value: Option<T>, name: &str) -> AppResult<T> {
    value.ok_or_else(|| AppError::BadRequest(format!("Form field '{name}' is required")))
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/evaluations/start
///
/// Multipart submission: `model_file`, `dataset`, optional
/// `preprocessor_file`, plus `target_column`, `user_id`, `model_name`, and
/// `split_data` form fields. Stages the uploads, creates the job, and
/// dispatches it; returns `{job_id, task_token, status: "processing"}`
/// without waiting for execution.
pub async fn start_evaluation(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut model_file = None;
    let mut dataset_file = None;
    let mut preprocessor_file = None;
    let mut target_column = None;
    let mut user_id = None;
    let mut model_name = None;
    let mut split_data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "model_file" => model_file = Some(read_file_field(field).await?),
            "dataset" => dataset_file = Some(read_file_field(field).await?),
            "preprocessor_file" => {
                let file = read_file_field(field).await?;
                // Browsers send an empty part for an unselected file input.
                if !file.bytes.is_empty() {
                    preprocessor_file = Some(file);
                }
            }
            "target_column" => target_column = Some(read_text_field(field).await?),
            "user_id" => user_id = Some(read_text_field(field).await?),
            "model_name" => model_name = Some(read_text_field(field).await?),
            "split_data" => {
                let raw = read_text_field(field).await?;
                split_data = Some(match raw.to_lowercase().as_str() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    other => {
                        return Err(AppError::BadRequest(format!(
                            "Form field 'split_data' must be a boolean, got '{other}'"
                        )))
                    }
                });
            }
            _ => {}
        }
    }

    let request = StageRequest {
        owner_id: require(user_id, "user_id")?,
        model_name: require(model_name, "model_name")?,
        target_column: require(target_column, "target_column")?,
        split_data: require(split_data, "split_data")?,
        model_file: require(model_file, "model_file")?,
        dataset_file: require(dataset_file, "dataset")?,
        preprocessor_file,
    };

    let staged = staging::stage_submission(
        &state.pool,
        &state.storage,
        &state.dispatcher,
        &state.config.staging_limits(),
        request,
    )
    .await?;

    Ok(Json(json!({
        "job_id": staged.job.id,
        "task_token": staged.task_token,
        "status": "processing",
        "message": "Evaluation started in background. Use task_token to track progress.",
    })))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/evaluations
///
/// List evaluation jobs for a user, newest first. Supports optional
/// `status_id`, `limit`, and `offset` query parameters.
pub async fn list_evaluations(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    if params.user_id.is_none() {
        return Err(AppError::BadRequest("User ID is required".to_string()));
    }
    let jobs = JobRepo::list(&state.pool, &params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Status / results
// ---------------------------------------------------------------------------

/// GET /api/v1/evaluations/{id}/status
///
/// Coarse job status: one of PENDING, PROCESSING, COMPLETED, FAILED.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state.pool, job_id).await?;
    let status = JobStatus::from_id(job.status_id)
        .map(JobStatus::as_str)
        .unwrap_or("UNKNOWN");
    Ok(Json(json!({ "job_id": job.id, "status": status })))
}

/// GET /api/v1/evaluations/{id}/results
///
/// The full job record including results, artifacts, and error message
/// once the job is terminal.
pub async fn get_job_results(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state.pool, job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Correlation-token queries
// ---------------------------------------------------------------------------

/// GET /api/v1/evaluations/task/{token}/status
///
/// Dispatcher-level execution state plus worker-reported progress.
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let report = state
        .dispatcher
        .status(token)
        .ok_or_else(|| AppError::NotFound(format!("Task {token} is not tracked")))?;
    Ok(Json(DataResponse { data: report }))
}

/// POST /api/v1/evaluations/task/{token}/cancel
///
/// Best-effort cooperative cancellation. The job row reaches a terminal
/// state only via the worker's own completion/failure path, so a
/// cancelled-but-unobserved job may remain PROCESSING until the worker
/// notices.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    if !state.dispatcher.cancel(token) {
        return Err(AppError::NotFound(format!("Task {token} is not tracked")));
    }

    tracing::info!(%token, "Task cancellation requested");
    Ok(Json(json!({
        "task_token": token,
        "message": format!("Task {token} cancellation requested"),
    })))
}
