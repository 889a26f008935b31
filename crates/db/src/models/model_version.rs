//! Model version entity models and DTOs (PRD-01).

use serde::Serialize;
use sqlx::FromRow;

use evalhub_core::types::{DbId, Timestamp};

/// A row from the `model_versions` table.
///
/// `version` is a monotonically increasing label (`v1`, `v2`, ...) scoped
/// to `(owner_id, name)`. `latest_metrics` holds the metric snapshot of the
/// most recent completed job for this version; `task_type` is inferred by
/// that job (`classification` or `regression`, NULL until the first
/// completed run).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ModelVersion {
    pub id: DbId,
    pub owner_id: String,
    pub name: String,
    pub version: String,
    pub package_path: String,
    pub latest_metrics: Option<serde_json::Value>,
    pub task_type: Option<String>,
    pub uploaded_at: Timestamp,
}

/// Insert payload for a new model version.
#[derive(Debug, Clone)]
pub struct NewModelVersion {
    pub owner_id: String,
    pub name: String,
    pub version: String,
    pub package_path: String,
}
