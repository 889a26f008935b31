//! Handlers for the `/models` resource (PRD-01, PRD-05).

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use evalhub_core::error::CoreError;
use evalhub_core::insight::generate_insights;
use evalhub_core::metrics::METRIC_RMSE;
use evalhub_core::task_type::{TaskKind, TASK_REGRESSION};
use evalhub_core::types::DbId;
use evalhub_db::models::model_version::ModelVersion;
use evalhub_db::repositories::ModelVersionRepo;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Query parameters for `GET /api/v1/models`.
#[derive(Debug, Deserialize)]
pub struct ModelListQuery {
    pub user_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

async fn find_model(pool: &sqlx::PgPool, id: DbId) -> AppResult<ModelVersion> {
    ModelVersionRepo::find_by_id(pool, id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "ModelVersion",
            id,
        }))
}

// ---------------------------------------------------------------------------
// List / get
// ---------------------------------------------------------------------------

/// GET /api/v1/models
///
/// List model versions, newest upload first, optionally filtered by owner.
pub async fn list_models(
    State(state): State<AppState>,
    Query(params): Query<ModelListQuery>,
) -> AppResult<impl IntoResponse> {
    let models = ModelVersionRepo::list(
        &state.pool,
        params.user_id.as_deref(),
        params.limit,
        params.offset,
    )
    .await?;
    Ok(Json(DataResponse { data: models }))
}

/// GET /api/v1/models/{id}
pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let model = find_model(&state.pool, id).await?;
    Ok(Json(DataResponse { data: model }))
}

// ---------------------------------------------------------------------------
// Insights
// ---------------------------------------------------------------------------

/// GET /api/v1/models/{id}/insights
///
/// Regenerate rule-based insights from the model's latest metrics
/// snapshot. Returns an empty list when no completed job has recorded
/// metrics yet.
pub async fn get_model_insights(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let model = find_model(&state.pool, id).await?;

    let metrics: BTreeMap<String, f64> = model
        .latest_metrics
        .as_ref()
        .and_then(|v| v.as_object())
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
                .collect()
        })
        .unwrap_or_default();

    if metrics.is_empty() {
        return Ok(Json(json!({
            "model_id": id,
            "insights": [],
            "message": "No metrics available for insights generation",
        })));
    }

    // Prefer the recorded task type; fall back to the metric shape.
    let task = match model.task_type.as_deref() {
        Some(TASK_REGRESSION) => TaskKind::Regression,
        Some(_) => TaskKind::Classification,
        None if metrics.contains_key(METRIC_RMSE) => TaskKind::Regression,
        None => TaskKind::Classification,
    };

    let insights = generate_insights(task, &metrics);
    Ok(Json(json!({ "model_id": id, "insights": insights })))
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// DELETE /api/v1/models/{id}
///
/// Delete a model version. Jobs and metric records cascade in the
/// database; the per-job artifact directories and the package file are
/// purged from disk afterwards.
pub async fn delete_model(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let model = find_model(&state.pool, id).await?;
    let job_ids = ModelVersionRepo::job_ids(&state.pool, id).await?;

    if !ModelVersionRepo::delete(&state.pool, id).await? {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "ModelVersion",
            id,
        }));
    }

    let storage = Arc::clone(&state.storage);
    let purge = tokio::task::spawn_blocking(move || storage.purge_job_dirs(&job_ids))
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    if !purge.errors.is_empty() {
        tracing::warn!(model_version_id = id, errors = ?purge.errors, "Model purge left errors");
    }

    if let Err(e) = tokio::fs::remove_file(&model.package_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(model_version_id = id, error = %e, "Failed to remove package file");
        }
    }

    tracing::info!(model_version_id = id, "Model version deleted");
    Ok(StatusCode::NO_CONTENT)
}
