//! Storage lifecycle manager (PRD-04).
//!
//! Tracks disk pressure for the storage base, keeps a bounded usage
//! history for trend reporting, and reclaims space: aged sweeps over the
//! job-artifact root, a two-pass emergency sweep, per-model purges, and
//! removal of incomplete job directories. Every destructive operation
//! tolerates missing paths and concurrent deletion; per-file failures are
//! collected into the report, never raised.
//!
//! All filesystem walks are synchronous; callers on the async runtime
//! offload via `spawn_blocking`.

use std::collections::VecDeque;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use walkdir::WalkDir;

use evalhub_core::storage::{classify_alert_level, AlertLevel};
use evalhub_core::types::{DbId, Timestamp};

use crate::error::PipelineError;
use crate::layout::StorageLayout;

/// Snapshots retained for trend reporting.
const MAX_HISTORY: usize = 100;

/// Usage-percentage delta treated as a real trend movement.
const TREND_DELTA_PCT: f64 = 5.0;

/// Emergency sweep thresholds: first pass, then a second if still critical.
const EMERGENCY_FIRST_PASS: Duration = Duration::from_secs(24 * 3600);
const EMERGENCY_SECOND_PASS: Duration = Duration::from_secs(3 * 24 * 3600);

/// Suffix marking partial files in interrupted job directories.
const PARTIAL_SUFFIX: &str = ".tmp";

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Point-in-time storage usage with its alert classification.
#[derive(Debug, Clone, Serialize)]
pub struct StorageUsage {
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
    pub usage_percentage: f64,
    pub alert_level: AlertLevel,
    pub timestamp: Timestamp,
}

/// Result of one aged sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub removed_files: usize,
    pub removed_dirs: usize,
    pub errors: Vec<String>,
    pub max_age_secs: u64,
}

/// Result of an emergency sweep: first pass always runs, second pass only
/// when the first left the store critical.
#[derive(Debug, Clone, Serialize)]
pub struct EmergencySweepReport {
    pub first_pass: SweepReport,
    pub second_pass: Option<SweepReport>,
    pub usage: StorageUsage,
}

/// Result of a per-model purge.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    pub removed_dirs: usize,
    pub errors: Vec<String>,
}

/// Result of an incomplete-directory purge.
#[derive(Debug, Clone, Serialize)]
pub struct IncompletePurgeReport {
    pub removed_dirs: Vec<String>,
    pub errors: Vec<String>,
}

/// Usage trend over a recent window.
#[derive(Debug, Clone, Serialize)]
pub struct UsageTrend {
    pub period_hours: u64,
    pub data_points: usize,
    pub average_usage: f64,
    pub trend: &'static str,
    pub timeline: Vec<StorageUsage>,
}

// ---------------------------------------------------------------------------
// StorageLifecycle
// ---------------------------------------------------------------------------

/// Owns disk-pressure tracking and space reclamation for one storage base.
pub struct StorageLifecycle {
    layout: StorageLayout,
    history: Mutex<VecDeque<StorageUsage>>,
}

impl StorageLifecycle {
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    // -- usage ---------------------------------------------------------------

    /// Current capacity and alert level of the filesystem backing the
    /// storage base.
    pub fn usage(&self) -> Result<StorageUsage, PipelineError> {
        let (total, free) = disk_capacity(self.layout.base())?;
        let total_mb = total / (1024 * 1024);
        let free_mb = free / (1024 * 1024);
        let used_mb = total_mb.saturating_sub(free_mb);
        let usage_percentage = if total_mb > 0 {
            (used_mb as f64 / total_mb as f64 * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };

        Ok(StorageUsage {
            total_mb,
            used_mb,
            free_mb,
            usage_percentage,
            alert_level: classify_alert_level(free_mb),
            timestamp: chrono::Utc::now(),
        })
    }

    /// Record the current usage into the bounded history and return it.
    pub fn snapshot(&self) -> Result<StorageUsage, PipelineError> {
        let usage = self.usage()?;
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(usage.clone());
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
        Ok(usage)
    }

    /// Usage trend over the last `hours` of recorded snapshots.
    pub fn trend(&self, hours: u64) -> UsageTrend {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours as i64);
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let timeline: Vec<StorageUsage> = history
            .iter()
            .filter(|u| u.timestamp > cutoff)
            .cloned()
            .collect();

        let average_usage = if timeline.is_empty() {
            0.0
        } else {
            let sum: f64 = timeline.iter().map(|u| u.usage_percentage).sum();
            (sum / timeline.len() as f64 * 100.0).round() / 100.0
        };

        UsageTrend {
            period_hours: hours,
            data_points: timeline.len(),
            average_usage,
            trend: classify_trend(&timeline),
            timeline,
        }
    }

    // -- sweeps --------------------------------------------------------------

    /// Delete files under the job-artifact root older than `max_age`, then
    /// prune directories left empty. Per-file failures are collected.
    pub fn sweep(&self, max_age: Duration) -> SweepReport {
        let mut report = SweepReport {
            removed_files: 0,
            removed_dirs: 0,
            errors: Vec::new(),
            max_age_secs: max_age.as_secs(),
        };

        let root = self.layout.jobs_root();
        if !root.exists() {
            return report;
        }
        let cutoff = SystemTime::now() - max_age;

        for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
                report
                    .errors
                    .push(format!("{}: modification time unavailable", path.display()));
                continue;
            };
            if modified < cutoff {
                match std::fs::remove_file(path) {
                    Ok(()) => report.removed_files += 1,
                    // Concurrent deletion is fine; anything else is recorded.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => report.errors.push(format!("{}: {e}", path.display())),
                }
            }
        }

        report.removed_dirs = prune_empty_dirs(&root, &mut report.errors);
        report
    }

    /// Two-pass emergency sweep: 1-day threshold, then 3 days if the store
    /// is still critical.
    pub fn emergency_sweep(&self) -> Result<EmergencySweepReport, PipelineError> {
        tracing::warn!("Emergency cleanup triggered by critical storage pressure");
        let first_pass = self.sweep(EMERGENCY_FIRST_PASS);

        let mut usage = self.usage()?;
        let second_pass = if usage.alert_level == AlertLevel::Critical {
            let report = self.sweep(EMERGENCY_SECOND_PASS);
            usage = self.usage()?;
            Some(report)
        } else {
            None
        };

        Ok(EmergencySweepReport {
            first_pass,
            second_pass,
            usage,
        })
    }

    /// Remove the artifact directories of every job belonging to one
    /// model version. Idempotent: absent directories are not errors.
    pub fn purge_job_dirs(&self, job_ids: &[DbId]) -> PurgeReport {
        let mut report = PurgeReport {
            removed_dirs: 0,
            errors: Vec::new(),
        };
        for &job_id in job_ids {
            let dir = self.layout.job_dir(job_id);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => report.removed_dirs += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => report.errors.push(format!("{}: {e}", dir.display())),
            }
        }
        report
    }

    /// Remove job directories that are empty or contain only partial
    /// (`*.tmp`) files. Reclaims space from interrupted runs that never
    /// reached the worker's failure-cleanup path.
    pub fn purge_incomplete(&self) -> IncompletePurgeReport {
        let mut report = IncompletePurgeReport {
            removed_dirs: Vec::new(),
            errors: Vec::new(),
        };

        let root = self.layout.jobs_root();
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
            Err(e) => {
                report.errors.push(format!("{}: {e}", root.display()));
                return report;
            }
        };

        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match dir_is_incomplete(&path) {
                Ok(true) => match std::fs::remove_dir_all(&path) {
                    Ok(()) => report
                        .removed_dirs
                        .push(entry.file_name().to_string_lossy().into_owned()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => report.errors.push(format!("{}: {e}", path.display())),
                },
                Ok(false) => {}
                Err(e) => report.errors.push(format!("{}: {e}", path.display())),
            }
        }

        report
    }
}

/// A job directory is incomplete when it is empty or every file in it is a
/// partial marker.
fn dir_is_incomplete(dir: &Path) -> std::io::Result<bool> {
    for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_file()
            && !entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX)
        {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Remove directories under `root` (depth-first) that are now empty.
/// `root` itself is kept.
fn prune_empty_dirs(root: &Path, errors: &mut Vec<String>) -> usize {
    let mut removed = 0;
    let mut dirs: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    // Deepest first so nested empties collapse upward.
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

    for dir in dirs {
        match std::fs::read_dir(&dir) {
            Ok(mut entries) => {
                if entries.next().is_none() {
                    match std::fs::remove_dir(&dir) {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => errors.push(format!("{}: {e}", dir.display())),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => errors.push(format!("{}: {e}", dir.display())),
        }
    }
    removed
}

fn classify_trend(timeline: &[StorageUsage]) -> &'static str {
    if timeline.len() < 2 {
        return "unknown";
    }
    let recent = &timeline[timeline.len().saturating_sub(5)..];
    let first = recent[0].usage_percentage;
    let last = recent[recent.len() - 1].usage_percentage;
    if last > first + TREND_DELTA_PCT {
        "increasing"
    } else if last < first - TREND_DELTA_PCT {
        "decreasing"
    } else {
        "stable"
    }
}

/// Total and free bytes of the filesystem containing `path`.
fn disk_capacity(path: &Path) -> Result<(u64, u64), PipelineError> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| PipelineError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(PipelineError::Io(std::io::Error::last_os_error()));
    }

    let frag = stat.f_frsize as u64;
    let total = stat.f_blocks as u64 * frag;
    let free = stat.f_bavail as u64 * frag;
    Ok((total, free))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
