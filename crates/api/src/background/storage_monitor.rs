//! Periodic storage monitoring and cleanup (PRD-04).
//!
//! Hourly: record a usage snapshot into the trend history and, when the
//! store is critical, trigger an emergency sweep. Daily: sweep job
//! artifacts older than the retention window.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use evalhub_core::storage::AlertLevel;
use evalhub_pipeline::storage::StorageLifecycle;

/// How often the usage snapshot runs.
const MONITOR_INTERVAL: Duration = Duration::from_secs(3600); // 1 hour

/// How often the retention sweep runs.
const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 3600); // daily

/// Files older than this are removed by the retention sweep.
const RETENTION_AGE: Duration = Duration::from_secs(7 * 24 * 3600); // 7 days

/// Run the storage monitoring loop until `cancel` is triggered.
pub async fn run(storage: Arc<StorageLifecycle>, cancel: CancellationToken) {
    tracing::info!(
        monitor_interval_secs = MONITOR_INTERVAL.as_secs(),
        retention_age_secs = RETENTION_AGE.as_secs(),
        "Storage monitor started"
    );

    let mut monitor_tick = tokio::time::interval(MONITOR_INTERVAL);
    let mut retention_tick = tokio::time::interval(RETENTION_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Storage monitor stopping");
                break;
            }
            _ = monitor_tick.tick() => {
                monitor_pass(&storage).await;
            }
            _ = retention_tick.tick() => {
                retention_pass(&storage).await;
            }
        }
    }
}

async fn monitor_pass(storage: &Arc<StorageLifecycle>) {
    let snapshot = {
        let storage = Arc::clone(storage);
        tokio::task::spawn_blocking(move || storage.snapshot()).await
    };

    match snapshot {
        Ok(Ok(usage)) => {
            tracing::debug!(
                free_mb = usage.free_mb,
                alert_level = usage.alert_level.as_str(),
                "Storage snapshot recorded"
            );
            if usage.alert_level == AlertLevel::Critical {
                let storage = Arc::clone(storage);
                let swept =
                    tokio::task::spawn_blocking(move || storage.emergency_sweep()).await;
                match swept {
                    Ok(Ok(report)) => tracing::info!(
                        removed_first = report.first_pass.removed_files,
                        second_pass = report.second_pass.is_some(),
                        "Emergency sweep completed"
                    ),
                    Ok(Err(e)) => tracing::error!(error = %e, "Emergency sweep failed"),
                    Err(e) => tracing::error!(error = %e, "Emergency sweep task failed"),
                }
            }
        }
        Ok(Err(e)) => tracing::error!(error = %e, "Storage snapshot failed"),
        Err(e) => tracing::error!(error = %e, "Storage snapshot task failed"),
    }
}

async fn retention_pass(storage: &Arc<StorageLifecycle>) {
    let storage = Arc::clone(storage);
    match tokio::task::spawn_blocking(move || storage.sweep(RETENTION_AGE)).await {
        Ok(report) => {
            if report.removed_files > 0 || !report.errors.is_empty() {
                tracing::info!(
                    removed_files = report.removed_files,
                    errors = report.errors.len(),
                    "Retention sweep completed"
                );
            } else {
                tracing::debug!("Retention sweep: nothing to remove");
            }
        }
        Err(e) => tracing::error!(error = %e, "Retention sweep task failed"),
    }
}
