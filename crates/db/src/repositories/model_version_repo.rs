//! Repository for the `model_versions` table (PRD-01).

use sqlx::PgPool;

use evalhub_core::types::DbId;

use crate::models::model_version::{ModelVersion, NewModelVersion};

/// Column list for `model_versions` queries.
const COLUMNS: &str = "\
    id, owner_id, name, version, package_path, latest_metrics, task_type, \
    uploaded_at";

/// Maximum page size for model listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for model listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides CRUD operations for model versions.
pub struct ModelVersionRepo;

impl ModelVersionRepo {
    /// Count existing versions for an `(owner, name)` pair. The next
    /// version label is `v{count + 1}`.
    pub async fn count_versions<'e, E>(
        executor: E,
        owner_id: &str,
        name: &str,
    ) -> Result<i64, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM model_versions WHERE owner_id = $1 AND name = $2",
        )
        .bind(owner_id)
        .bind(name)
        .fetch_one(executor)
        .await
    }

    /// Create a new model version row. Accepts any executor so staging can
    /// run it inside its rollback transaction.
    pub async fn create<'e, E>(
        executor: E,
        input: &NewModelVersion,
    ) -> Result<ModelVersion, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let query = format!(
            "INSERT INTO model_versions (owner_id, name, version, package_path) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ModelVersion>(&query)
            .bind(&input.owner_id)
            .bind(&input.name)
            .bind(&input.version)
            .bind(&input.package_path)
            .fetch_one(executor)
            .await
    }

    /// Find a model version by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ModelVersion>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM model_versions WHERE id = $1");
        sqlx::query_as::<_, ModelVersion>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List model versions, optionally filtered by owner, newest first.
    pub async fn list(
        pool: &PgPool,
        owner_id: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<ModelVersion>, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = offset.unwrap_or(0);

        match owner_id {
            Some(owner) => {
                let query = format!(
                    "SELECT {COLUMNS} FROM model_versions \
                     WHERE owner_id = $1 \
                     ORDER BY uploaded_at DESC LIMIT $2 OFFSET $3"
                );
                sqlx::query_as::<_, ModelVersion>(&query)
                    .bind(owner)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
            }
            None => {
                let query = format!(
                    "SELECT {COLUMNS} FROM model_versions \
                     ORDER BY uploaded_at DESC LIMIT $1 OFFSET $2"
                );
                sqlx::query_as::<_, ModelVersion>(&query)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
            }
        }
    }

    /// Overwrite the metrics snapshot and inferred task type with the
    /// results of the most recent completed job.
    pub async fn update_latest_metrics(
        pool: &PgPool,
        id: DbId,
        metrics: &serde_json::Value,
        task_type: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE model_versions SET latest_metrics = $2, task_type = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(metrics)
        .bind(task_type)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// IDs of all jobs referencing this model version. Used to map a model
    /// purge onto its per-job artifact directories.
    pub async fn job_ids(pool: &PgPool, id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "SELECT id FROM evaluation_jobs WHERE model_version_id = $1",
        )
        .bind(id)
        .fetch_all(pool)
        .await
    }

    /// Delete a model version. Jobs and metric records cascade.
    ///
    /// Returns `true` if a row was deleted.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM model_versions WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
