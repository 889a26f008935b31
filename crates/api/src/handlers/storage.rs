//! Handlers for the `/storage` resource (PRD-04).
//!
//! All endpoints are idempotent and safe to call repeatedly. Sweep and
//! purge operations run on the blocking pool; their per-file failures are
//! reported in the response body, never as HTTP errors.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use evalhub_core::types::DbId;
use evalhub_db::repositories::ModelVersionRepo;
use evalhub_pipeline::storage::StorageLifecycle;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Default sweep age in days.
const DEFAULT_SWEEP_DAYS: u64 = 7;

/// Default trend window in hours.
const DEFAULT_TREND_HOURS: u64 = 24;

/// Maximum trend window in hours (one week).
const MAX_TREND_HOURS: u64 = 168;

#[derive(Debug, Deserialize)]
pub struct SweepQuery {
    /// Files older than this many days are deleted. Default 7, minimum 1.
    pub days: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    /// Trend window in hours. Default 24, capped at 168.
    pub hours: Option<u64>,
}

/// Run a blocking storage operation on the blocking pool.
async fn run_storage_op<T, F>(storage: &Arc<StorageLifecycle>, op: F) -> AppResult<T>
where
    F: FnOnce(&StorageLifecycle) -> T + Send + 'static,
    T: Send + 'static,
{
    let storage = Arc::clone(storage);
    tokio::task::spawn_blocking(move || op(&storage))
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))
}

// ---------------------------------------------------------------------------
// GET /storage/usage
// ---------------------------------------------------------------------------

/// Current capacity, free space, and alert level of the storage base.
pub async fn get_usage(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let usage = state.storage.usage()?;
    Ok(Json(DataResponse { data: usage }))
}

// ---------------------------------------------------------------------------
// POST /storage/sweep
// ---------------------------------------------------------------------------

/// Delete job-artifact files older than `days` (default 7).
pub async fn sweep(
    State(state): State<AppState>,
    Query(params): Query<SweepQuery>,
) -> AppResult<impl IntoResponse> {
    let days = params.days.unwrap_or(DEFAULT_SWEEP_DAYS).max(1);
    let max_age = Duration::from_secs(days * 24 * 3600);

    let report = run_storage_op(&state.storage, move |s| s.sweep(max_age)).await?;
    tracing::info!(
        days,
        removed_files = report.removed_files,
        errors = report.errors.len(),
        "Storage sweep completed",
    );
    Ok(Json(DataResponse { data: report }))
}

// ---------------------------------------------------------------------------
// POST /storage/sweep/emergency
// ---------------------------------------------------------------------------

/// Aggressive two-pass cleanup for critical storage pressure: 1-day
/// threshold first, then 3 days if still critical.
pub async fn emergency_sweep(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let report = run_storage_op(&state.storage, |s| s.emergency_sweep()).await??;
    Ok(Json(DataResponse { data: report }))
}

// ---------------------------------------------------------------------------
// POST /storage/sweep/incomplete
// ---------------------------------------------------------------------------

/// Remove job directories that are empty or contain only partial files,
/// reclaiming space from interrupted runs.
pub async fn purge_incomplete(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let report = run_storage_op(&state.storage, |s| s.purge_incomplete()).await?;
    Ok(Json(DataResponse { data: report }))
}

// ---------------------------------------------------------------------------
// DELETE /storage/models/{id}
// ---------------------------------------------------------------------------

/// Remove the job-artifact directories for one model version. Idempotent:
/// absent directories (or an already-deleted model) are a no-op.
pub async fn purge_model(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job_ids = ModelVersionRepo::job_ids(&state.pool, id).await?;
    let report = run_storage_op(&state.storage, move |s| s.purge_job_dirs(&job_ids)).await?;
    Ok(Json(DataResponse { data: report }))
}

// ---------------------------------------------------------------------------
// GET /storage/trend
// ---------------------------------------------------------------------------

/// Usage trend over the last `hours` (default 24, capped at one week) of
/// recorded snapshots.
pub async fn get_trend(
    State(state): State<AppState>,
    Query(params): Query<TrendQuery>,
) -> AppResult<impl IntoResponse> {
    let hours = params
        .hours
        .unwrap_or(DEFAULT_TREND_HOURS)
        .clamp(1, MAX_TREND_HOURS);
    let trend = state.storage.trend(hours);
    Ok(Json(DataResponse { data: trend }))
}
