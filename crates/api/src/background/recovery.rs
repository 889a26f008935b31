//! Pending-job recovery loop (PRD-02).
//!
//! Dispatch is at-least-once: a job staged just before a crash can be left
//! PENDING with no live worker. This loop periodically re-dispatches
//! PENDING jobs past a grace period whose correlation token is not in the
//! dispatcher registry. Re-dispatching a job that is actually being worked
//! is harmless: the worker's PENDING-claim makes re-entry a no-op.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use evalhub_db::repositories::JobRepo;
use evalhub_pipeline::dispatcher::{EvaluationSpec, TaskDispatcher};

/// How often the recovery loop scans for stale jobs.
const SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// PENDING jobs younger than this are left alone; their dispatch is
/// assumed to still be in flight.
const DISPATCH_GRACE: Duration = Duration::from_secs(120);

/// Terminal registry entries older than this are pruned.
const REGISTRY_RETENTION: Duration = Duration::from_secs(3600);

/// Run the recovery loop until `cancel` is triggered.
pub async fn run(pool: PgPool, dispatcher: Arc<TaskDispatcher>, cancel: CancellationToken) {
    tracing::info!(
        scan_interval_secs = SCAN_INTERVAL.as_secs(),
        grace_secs = DISPATCH_GRACE.as_secs(),
        "Job recovery loop started"
    );

    let mut ticker = tokio::time::interval(SCAN_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job recovery loop stopping");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = scan_once(&pool, &dispatcher).await {
                    tracing::error!(error = %e, "Recovery scan failed");
                }
                let pruned = dispatcher.prune_finished(REGISTRY_RETENTION);
                if pruned > 0 {
                    tracing::debug!(pruned, "Pruned finished task registry entries");
                }
            }
        }
    }
}

async fn scan_once(pool: &PgPool, dispatcher: &Arc<TaskDispatcher>) -> Result<(), sqlx::Error> {
    let cutoff = chrono::Utc::now()
        - chrono::Duration::from_std(DISPATCH_GRACE).unwrap_or(chrono::Duration::zero());
    let stale = JobRepo::list_stale_pending(pool, cutoff).await?;

    for job in stale {
        let tracked = job
            .task_token
            .map(|token| dispatcher.is_tracked(token))
            .unwrap_or(false);
        if tracked {
            continue;
        }

        let token = match job.task_token {
            Some(token) => token,
            None => {
                // Crash before the token was recorded; assign one now.
                let token = Uuid::new_v4();
                JobRepo::set_task_token(pool, job.id, token).await?;
                token
            }
        };

        tracing::warn!(job_id = job.id, %token, "Re-dispatching stale pending job");
        dispatcher.dispatch_with_token(
            token,
            EvaluationSpec {
                job_id: job.id,
                model_version_id: job.model_version_id,
                package_path: job.package_path.clone(),
                dataset_path: job.dataset_path.clone(),
                target_column: job.target_column.clone(),
                split_data: job.split_data,
            },
        );
    }

    Ok(())
}
