//! Filesystem layout for staged uploads and per-job artifact directories
//! (PRD-04).
//!
//! All paths are derived from one base directory so ownership handoffs
//! (stager -> worker -> storage lifecycle) go through a single factory
//! keyed by job id rather than ad-hoc path concatenation.

use std::path::{Path, PathBuf};

use evalhub_core::types::DbId;

/// Default base directory for all upload/artifact storage.
pub const DEFAULT_STORAGE_BASE: &str = "var/uploads";

/// Factory for the on-disk layout under one storage base.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    base: PathBuf,
}

impl StorageLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The storage base directory (disk-usage checks run against it).
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Staging root: one package archive + raw dataset per submission.
    pub fn temp_root(&self) -> PathBuf {
        self.base.join("temp")
    }

    /// Permanent artifact root: one directory per job, named by job id.
    pub fn jobs_root(&self) -> PathBuf {
        self.base.join("eval_jobs")
    }

    /// The permanent artifact directory for one job.
    pub fn job_dir(&self, job_id: DbId) -> PathBuf {
        self.jobs_root().join(job_id.to_string())
    }

    /// Relative artifact reference stored on job results, e.g.
    /// `eval_jobs/42/confusion_matrix.png`.
    pub fn artifact_url(&self, job_id: DbId, filename: &str) -> String {
        format!("eval_jobs/{job_id}/{filename}")
    }

    /// Create the temp and jobs roots if absent.
    pub fn ensure_roots(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.temp_root())?;
        std::fs::create_dir_all(self.jobs_root())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_derive_from_base() {
        let layout = StorageLayout::new("/data/uploads");
        assert_eq!(layout.temp_root(), PathBuf::from("/data/uploads/temp"));
        assert_eq!(layout.jobs_root(), PathBuf::from("/data/uploads/eval_jobs"));
        assert_eq!(
            layout.job_dir(42),
            PathBuf::from("/data/uploads/eval_jobs/42")
        );
    }

    #[test]
    fn artifact_url_is_relative() {
        let layout = StorageLayout::new("/data/uploads");
        assert_eq!(
            layout.artifact_url(7, "confusion_matrix.png"),
            "eval_jobs/7/confusion_matrix.png"
        );
    }

    #[test]
    fn ensure_roots_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("uploads"));
        layout.ensure_roots().unwrap();
        assert!(layout.temp_root().is_dir());
        assert!(layout.jobs_root().is_dir());
    }
}
