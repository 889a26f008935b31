//! Evaluation job entity models and DTOs (PRD-02).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use evalhub_core::types::{DbId, Timestamp};

use super::status::StatusId;

/// A row from the `evaluation_jobs` table.
///
/// `results`/`artifacts` are non-null only once the job completes;
/// `error_message` is non-null only once it fails. The dispatch parameters
/// (`package_path`, `dataset_path`, `target_column`, `split_data`) are
/// persisted so a lost dispatch can be replayed.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub owner_id: String,
    pub model_name: String,
    pub model_version_id: DbId,
    pub status_id: StatusId,
    pub task_token: Option<Uuid>,
    pub results: Option<serde_json::Value>,
    pub artifacts: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub package_path: String,
    pub dataset_path: String,
    pub target_column: String,
    pub split_data: bool,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// Insert payload for a new evaluation job. Jobs always start PENDING.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: String,
    pub model_name: String,
    pub model_version_id: DbId,
    pub package_path: String,
    pub dataset_path: String,
    pub target_column: String,
    pub split_data: bool,
}

/// Query parameters for `GET /api/v1/evaluations`.
#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    /// Filter by owner.
    pub user_id: Option<String>,
    /// Filter by status ID (e.g. 1 = pending, 4 = failed).
    pub status_id: Option<StatusId>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}
