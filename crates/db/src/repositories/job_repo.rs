//! Repository for the `evaluation_jobs` table (PRD-02).
//!
//! Status transitions are guarded in SQL so the job state machine is
//! monotonic: `begin_processing` claims only PENDING rows, and
//! `complete`/`fail` touch only PROCESSING rows. A terminal row is never
//! updated again, which makes worker re-entry a safe no-op under
//! at-least-once dispatch.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use evalhub_core::types::DbId;

use crate::models::job::{Job, JobListQuery, NewJob};
use crate::models::status::JobStatus;

/// Column list for `evaluation_jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, model_name, model_version_id, status_id, task_token, \
    results, artifacts, error_message, \
    package_path, dataset_path, target_column, split_data, \
    created_at, completed_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides CRUD operations for evaluation jobs.
pub struct JobRepo;

impl JobRepo {
    /// Create a new pending job. Accepts any executor so staging can run
    /// it inside its rollback transaction.
    pub async fn create<'e, E>(executor: E, input: &NewJob) -> Result<Job, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let query = format!(
            "INSERT INTO evaluation_jobs \
                 (owner_id, model_name, model_version_id, status_id, \
                  package_path, dataset_path, target_column, split_data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(&input.owner_id)
            .bind(&input.model_name)
            .bind(input.model_version_id)
            .bind(JobStatus::Pending.id())
            .bind(&input.package_path)
            .bind(&input.dataset_path)
            .bind(&input.target_column)
            .bind(input.split_data)
            .fetch_one(executor)
            .await
    }

    /// Record the correlation token returned by the dispatcher.
    pub async fn set_task_token<'e, E>(
        executor: E,
        job_id: DbId,
        token: Uuid,
    ) -> Result<(), sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query("UPDATE evaluation_jobs SET task_token = $2 WHERE id = $1")
            .bind(job_id)
            .bind(token)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM evaluation_jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Atomically claim a pending job for processing.
    ///
    /// Returns `true` only when the row existed and was still PENDING.
    /// A `false` return means the job is missing, already running, or
    /// terminal; the worker must treat it as a no-op.
    pub async fn begin_processing(pool: &PgPool, job_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE evaluation_jobs SET status_id = $2 \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(job_id)
        .bind(JobStatus::Processing.id())
        .bind(JobStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a job as completed with its results and artifacts payloads.
    ///
    /// Only PROCESSING rows are updated, so a terminal state is never
    /// overwritten.
    pub async fn complete(
        pool: &PgPool,
        job_id: DbId,
        results: &serde_json::Value,
        artifacts: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE evaluation_jobs \
             SET status_id = $2, results = $3, artifacts = $4, completed_at = NOW() \
             WHERE id = $1 AND status_id = $5",
        )
        .bind(job_id)
        .bind(JobStatus::Completed.id())
        .bind(results)
        .bind(artifacts)
        .bind(JobStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a job as failed with the captured error message.
    ///
    /// Only PROCESSING rows are updated.
    pub async fn fail(pool: &PgPool, job_id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE evaluation_jobs \
             SET status_id = $2, error_message = $3, completed_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(job_id)
        .bind(JobStatus::Failed.id())
        .bind(error)
        .bind(JobStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List PENDING jobs created before `cutoff`.
    ///
    /// Used by the recovery loop to find jobs whose dispatch was lost
    /// (e.g. across a process restart).
    pub async fn list_stale_pending(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM evaluation_jobs \
             WHERE status_id = $1 AND created_at < $2 \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Pending.id())
            .bind(cutoff)
            .fetch_all(pool)
            .await
    }

    /// List jobs with optional owner/status filters and pagination,
    /// newest first.
    pub async fn list(pool: &PgPool, params: &JobListQuery) -> Result<Vec<Job>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = params.offset.unwrap_or(0);

        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if params.user_id.is_some() {
            conditions.push(format!("owner_id = ${bind_idx}"));
            bind_idx += 1;
        }

        if params.status_id.is_some() {
            conditions.push(format!("status_id = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM evaluation_jobs \
             {where_clause} \
             ORDER BY created_at DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Job>(&query);

        if let Some(ref uid) = params.user_id {
            q = q.bind(uid.clone());
        }
        if let Some(sid) = params.status_id {
            q = q.bind(sid);
        }

        q = q.bind(limit).bind(offset);

        q.fetch_all(pool).await
    }
}
