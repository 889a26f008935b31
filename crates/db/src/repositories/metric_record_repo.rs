//! Repository for the append-only `metric_records` table (PRD-05).

use sqlx::PgPool;

use evalhub_core::types::DbId;

use crate::models::metric_record::MetricRecord;

/// Column list for `metric_records` queries.
const COLUMNS: &str = "id, model_version_id, metrics, recorded_at";

/// Provides append/list operations for metric history. Records are never
/// updated; deletion happens only via the model-version cascade.
pub struct MetricRecordRepo;

impl MetricRecordRepo {
    /// Append one observation for a model version.
    pub async fn append(
        pool: &PgPool,
        model_version_id: DbId,
        metrics: &serde_json::Value,
    ) -> Result<MetricRecord, sqlx::Error> {
        let query = format!(
            "INSERT INTO metric_records (model_version_id, metrics) \
             VALUES ($1, $2) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, MetricRecord>(&query)
            .bind(model_version_id)
            .bind(metrics)
            .fetch_one(pool)
            .await
    }

    /// Metric history for a model version, oldest first.
    pub async fn list_for_model(
        pool: &PgPool,
        model_version_id: DbId,
    ) -> Result<Vec<MetricRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM metric_records \
             WHERE model_version_id = $1 \
             ORDER BY recorded_at ASC"
        );
        sqlx::query_as::<_, MetricRecord>(&query)
            .bind(model_version_id)
            .fetch_all(pool)
            .await
    }
}
