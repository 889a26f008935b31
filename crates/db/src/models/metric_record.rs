//! Append-only metric history entity (PRD-05).

use serde::Serialize;
use sqlx::FromRow;

use evalhub_core::types::{DbId, Timestamp};

/// A row from the `metric_records` table.
///
/// One record is appended per completed evaluation job. Records are never
/// mutated; they are deleted only via the owning model's cascade.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MetricRecord {
    pub id: DbId,
    pub model_version_id: DbId,
    pub metrics: serde_json::Value,
    pub recorded_at: Timestamp,
}
