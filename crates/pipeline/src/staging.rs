//! The artifact stager (PRD-01).
//!
//! Validates a submission, persists the uploads under collision-resistant
//! names, bundles the model (+ optional preprocessor) into one package
//! archive, creates the model-version and job rows, and hands the staged
//! job to the dispatcher. Database writes run inside a single transaction
//! committed before dispatch; any failure before the commit rolls the
//! transaction back and deletes every file written so far, so partial
//! state is never observable.

use std::io::Write;
use std::path::{Path, PathBuf};

use sqlx::PgPool;
use uuid::Uuid;
use zip::write::SimpleFileOptions;

use evalhub_core::storage::{
    package_file_name, staged_file_name, unique_fragment, validate_extension,
    validate_upload_size, AlertLevel, DEFAULT_MAX_MODEL_SIZE_MB, MODEL_EXTENSIONS,
};

use evalhub_db::models::job::{Job, NewJob};
use evalhub_db::models::model_version::{ModelVersion, NewModelVersion};
use evalhub_db::repositories::{JobRepo, ModelVersionRepo};

use crate::dispatcher::{EvaluationSpec, TaskDispatcher};
use crate::storage::StorageLifecycle;

/// Archive entry name for the model artifact.
pub const PACKAGE_MODEL_NAME: &str = "model.json";

/// Archive entry name for the optional preprocessor artifact.
pub const PACKAGE_PREPROCESSOR_NAME: &str = "preprocessor.json";

// ---------------------------------------------------------------------------
// Inputs and errors
// ---------------------------------------------------------------------------

/// One uploaded multipart file.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A validated submission request.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub owner_id: String,
    pub model_name: String,
    pub target_column: String,
    pub split_data: bool,
    pub model_file: UploadedFile,
    pub dataset_file: UploadedFile,
    pub preprocessor_file: Option<UploadedFile>,
}

/// Staging limits, configurable per deployment.
#[derive(Debug, Clone)]
pub struct StagingLimits {
    pub max_model_size_mb: u64,
    pub model_extensions: &'static [&'static str],
}

impl Default for StagingLimits {
    fn default() -> Self {
        Self {
            max_model_size_mb: DEFAULT_MAX_MODEL_SIZE_MB,
            model_extensions: MODEL_EXTENSIONS,
        }
    }
}

/// Staging failures, surfaced synchronously to the submitter with
/// distinct error codes.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// Global storage usage is at the critical alert level.
    #[error("Insufficient storage space")]
    StorageCritical,

    /// The model file exceeds the configured size ceiling.
    #[error("File too large (limit {limit_mb}MB)")]
    FileTooLarge { limit_mb: u64 },

    /// The model file failed the extension allow-list check.
    #[error("File type not allowed: {0}")]
    DisallowedFileType(String),

    /// Disk or database failure mid-staging; everything was rolled back.
    #[error("Evaluation setup failed: {0}")]
    Setup(String),
}

/// Result of a successful staging run: exactly one job row, one model
/// version row, and one package file on disk.
#[derive(Debug)]
pub struct StagedSubmission {
    pub job: Job,
    pub model_version: ModelVersion,
    pub task_token: Uuid,
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// Stage a submission and dispatch it for evaluation.
pub async fn stage_submission(
    pool: &PgPool,
    storage: &StorageLifecycle,
    dispatcher: &std::sync::Arc<TaskDispatcher>,
    limits: &StagingLimits,
    request: StageRequest,
) -> Result<StagedSubmission, StagingError> {
    // (a) Reject while storage pressure is critical.
    let usage = storage
        .usage()
        .map_err(|e| StagingError::Setup(e.to_string()))?;
    if usage.alert_level == AlertLevel::Critical {
        return Err(StagingError::StorageCritical);
    }

    // (b) Size ceiling and extension allow-list for the model file.
    validate_upload_size(request.model_file.bytes.len() as u64, limits.max_model_size_mb)
        .map_err(|_| StagingError::FileTooLarge {
            limit_mb: limits.max_model_size_mb,
        })?;
    validate_extension(&request.model_file.filename, limits.model_extensions)
        .map_err(|_| StagingError::DisallowedFileType(request.model_file.filename.clone()))?;

    let layout = storage.layout();
    let temp_root = layout.temp_root();
    let fragment = unique_fragment();

    let dataset_path =
        temp_root.join(staged_file_name(&request.owner_id, &fragment, &request.dataset_file.filename));
    let model_path =
        temp_root.join(staged_file_name(&request.owner_id, &fragment, &request.model_file.filename));
    let preprocessor_path = request.preprocessor_file.as_ref().map(|f| {
        temp_root.join(staged_file_name(&request.owner_id, &fragment, &f.filename))
    });
    let package_path = temp_root.join(package_file_name(&request.owner_id, &fragment));

    let mut written: Vec<PathBuf> = Vec::new();

    let staged = stage_inner(
        pool,
        &request,
        &dataset_path,
        &model_path,
        preprocessor_path.as_deref(),
        &package_path,
        &mut written,
    )
    .await;

    match staged {
        Ok(staged) => {
            // (f) Hand the staged job to the dispatcher. Infallible spawn;
            // the job row is already committed.
            dispatcher.dispatch_with_token(
                staged.task_token,
                EvaluationSpec {
                    job_id: staged.job.id,
                    model_version_id: staged.model_version.id,
                    package_path: staged.job.package_path.clone(),
                    dataset_path: staged.job.dataset_path.clone(),
                    target_column: staged.job.target_column.clone(),
                    split_data: staged.job.split_data,
                },
            );

            tracing::info!(
                job_id = staged.job.id,
                model_version_id = staged.model_version.id,
                owner_id = %request.owner_id,
                "Submission staged and dispatched",
            );
            Ok(staged)
        }
        Err(e) => {
            // Partial state must never be observable: remove every file
            // written so far (the transaction already rolled back).
            for path in &written {
                remove_quiet(path).await;
            }
            Err(e)
        }
    }
}

/// The failable portion of staging. Every file it writes is recorded in
/// `written` so the caller can delete them on failure.
async fn stage_inner(
    pool: &PgPool,
    request: &StageRequest,
    dataset_path: &Path,
    model_path: &Path,
    preprocessor_path: Option<&Path>,
    package_path: &Path,
    written: &mut Vec<PathBuf>,
) -> Result<StagedSubmission, StagingError> {
    let setup = |e: &dyn std::fmt::Display| StagingError::Setup(e.to_string());

    // (c) Persist inputs under collision-resistant names.
    write_tracked(dataset_path, &request.dataset_file.bytes, written)
        .await
        .map_err(|e| setup(&e))?;
    write_tracked(model_path, &request.model_file.bytes, written)
        .await
        .map_err(|e| setup(&e))?;
    if let (Some(path), Some(file)) = (preprocessor_path, &request.preprocessor_file) {
        write_tracked(path, &file.bytes, written)
            .await
            .map_err(|e| setup(&e))?;
    }

    // (d) Bundle model (+ preprocessor) into the package archive on the
    // blocking pool, then drop the now-redundant loose files.
    let archive_inputs = BundleInputs {
        package_path: package_path.to_path_buf(),
        model_path: model_path.to_path_buf(),
        preprocessor_path: preprocessor_path.map(Path::to_path_buf),
    };
    written.push(package_path.to_path_buf());
    tokio::task::spawn_blocking(move || bundle_package(&archive_inputs))
        .await
        .map_err(|e| setup(&e))?
        .map_err(|e| setup(&e))?;

    // The loose copies are no longer tracked for rollback once removed.
    remove_quiet(model_path).await;
    written.retain(|p| p != model_path);
    if let Some(path) = preprocessor_path {
        remove_quiet(path).await;
        written.retain(|p| p != path);
    }

    // (e) Exactly one model-version row and one job row, atomically.
    let mut tx = pool.begin().await.map_err(|e| setup(&e))?;

    let version_count =
        ModelVersionRepo::count_versions(&mut *tx, &request.owner_id, &request.model_name)
            .await
            .map_err(|e| setup(&e))?;
    let model_version = ModelVersionRepo::create(
        &mut *tx,
        &NewModelVersion {
            owner_id: request.owner_id.clone(),
            name: request.model_name.clone(),
            version: format!("v{}", version_count + 1),
            package_path: package_path.display().to_string(),
        },
    )
    .await
    .map_err(|e| setup(&e))?;

    let mut job = JobRepo::create(
        &mut *tx,
        &NewJob {
            owner_id: request.owner_id.clone(),
            model_name: request.model_name.clone(),
            model_version_id: model_version.id,
            package_path: package_path.display().to_string(),
            dataset_path: dataset_path.display().to_string(),
            target_column: request.target_column.clone(),
            split_data: request.split_data,
        },
    )
    .await
    .map_err(|e| setup(&e))?;

    let task_token = Uuid::new_v4();
    JobRepo::set_task_token(&mut *tx, job.id, task_token)
        .await
        .map_err(|e| setup(&e))?;
    job.task_token = Some(task_token);

    tx.commit().await.map_err(|e| setup(&e))?;

    Ok(StagedSubmission {
        job,
        model_version,
        task_token,
    })
}

struct BundleInputs {
    package_path: PathBuf,
    model_path: PathBuf,
    preprocessor_path: Option<PathBuf>,
}

/// Write the package archive: model under a fixed entry name, plus the
/// optional preprocessor.
fn bundle_package(inputs: &BundleInputs) -> std::io::Result<()> {
    let file = std::fs::File::create(&inputs.package_path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    writer.start_file(PACKAGE_MODEL_NAME, options)?;
    writer.write_all(&std::fs::read(&inputs.model_path)?)?;

    if let Some(preprocessor) = &inputs.preprocessor_path {
        writer.start_file(PACKAGE_PREPROCESSOR_NAME, options)?;
        writer.write_all(&std::fs::read(preprocessor)?)?;
    }

    writer.finish()?;
    Ok(())
}

async fn write_tracked(
    path: &Path,
    bytes: &[u8],
    written: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    tokio::fs::write(path, bytes).await?;
    written.push(path.to_path_buf());
    Ok(())
}

async fn remove_quiet(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove staged file");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
