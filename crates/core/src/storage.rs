//! Storage alert levels, upload validation, and staged-file naming (PRD-04).
//!
//! Alert levels are computed from free disk space and drive both the
//! submission pre-check (critical blocks new uploads) and the cleanup
//! aggressiveness of the storage lifecycle manager.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Alert thresholds
// ---------------------------------------------------------------------------

/// Free space below this many MB raises the `warning` level.
pub const ALERT_WARNING_FREE_MB: u64 = 5 * 1024;

/// Free space below this many MB raises the `high_warning` level.
pub const ALERT_HIGH_WARNING_FREE_MB: u64 = 2 * 1024;

/// Free space below this many MB raises the `critical` level. New
/// submissions are rejected at this level.
pub const ALERT_CRITICAL_FREE_MB: u64 = 1024;

// ---------------------------------------------------------------------------
// Upload limits
// ---------------------------------------------------------------------------

/// Default ceiling for uploaded model artifacts, in MB.
pub const DEFAULT_MAX_MODEL_SIZE_MB: u64 = 100;

/// Extensions accepted for uploaded model artifacts.
pub const MODEL_EXTENSIONS: &[&str] = &["json", "zip"];

// ---------------------------------------------------------------------------
// AlertLevel
// ---------------------------------------------------------------------------

/// Coarse storage-pressure classification driving cleanup aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    Normal,
    Warning,
    HighWarning,
    Critical,
}

impl AlertLevel {
    /// API string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::HighWarning => "high_warning",
            Self::Critical => "critical",
        }
    }
}

impl serde::Serialize for AlertLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Classify free disk space into an alert level.
pub fn classify_alert_level(free_mb: u64) -> AlertLevel {
    if free_mb < ALERT_CRITICAL_FREE_MB {
        AlertLevel::Critical
    } else if free_mb < ALERT_HIGH_WARNING_FREE_MB {
        AlertLevel::HighWarning
    } else if free_mb < ALERT_WARNING_FREE_MB {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

// ---------------------------------------------------------------------------
// Upload validation
// ---------------------------------------------------------------------------

/// Lowercased extension of a filename, without the leading dot.
pub fn file_extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Validate that an upload does not exceed the configured size ceiling.
pub fn validate_upload_size(size_bytes: u64, max_size_mb: u64) -> Result<(), CoreError> {
    if size_bytes > max_size_mb * 1024 * 1024 {
        return Err(CoreError::Validation(format!(
            "File exceeds size limit of {max_size_mb}MB"
        )));
    }
    Ok(())
}

/// Validate a filename against an extension allow-list.
pub fn validate_extension(filename: &str, allowed: &[&str]) -> Result<(), CoreError> {
    match file_extension(filename) {
        Some(ext) if allowed.contains(&ext.as_str()) => Ok(()),
        Some(ext) => Err(CoreError::Validation(format!(
            "File type '.{ext}' not allowed. Allowed: {}",
            allowed
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))),
        None => Err(CoreError::Validation(
            "File has no extension".to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Staged-file naming
// ---------------------------------------------------------------------------

/// Short unique fragment for collision-resistant staged filenames.
pub fn unique_fragment() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Collision-resistant staged filename: `{owner}_{fragment}_{original}`.
pub fn staged_file_name(owner_id: &str, fragment: &str, original: &str) -> String {
    format!("{owner_id}_{fragment}_{original}")
}

/// Name of the package archive for a submission.
pub fn package_file_name(owner_id: &str, fragment: &str) -> String {
    format!("{owner_id}_{fragment}_package.zip")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
