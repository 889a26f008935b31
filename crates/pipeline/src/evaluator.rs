//! The evaluation worker (PRD-03).
//!
//! Drives one job through the execution protocol: extract the staged
//! package, load the model and dataset, preprocess, fit/predict, score,
//! render a diagnostic plot, and persist the outcome. Every CPU/IO-bound
//! stage runs on the blocking pool; cancellation and the soft ceiling are
//! checked between stages.
//!
//! Failure handling: one top-level catch. The job row (if claimed) is set
//! to FAILED with the error message, the permanent job directory is
//! deleted, and the original uploaded package and
//! dataset files are removed. A failure while recording the FAILED status
//! is logged but never re-raised, so the original error is not masked.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use evalhub_core::insight::generate_insights;
use evalhub_core::metrics::{
    self, METRIC_ACCURACY, METRIC_AUC, METRIC_F1_SCORE, METRIC_R2_SCORE, METRIC_RMSE,
    RESULT_KEY_INSIGHTS,
};
use evalhub_core::task_type::{
    resolve_task_kind, TaskKind, DEFAULT_CLASS_CARDINALITY_THRESHOLD,
};
use evalhub_db::repositories::{JobRepo, MetricRecordRepo, ModelVersionRepo};

use crate::artifact::{
    self, Transformer, MODEL_ARTIFACT_NAMES, PREPROCESSOR_ARTIFACT_NAMES,
};
use crate::dispatcher::{EvaluationSpec, ProgressReporter};
use crate::error::PipelineError;
use crate::frame::{train_test_split, Frame, TEST_FRACTION};
use crate::layout::StorageLayout;
use crate::plot::{self, CONFUSION_MATRIX_FILE, REGRESSION_PLOT_FILE};
use crate::preprocess::{build_auto_preprocessor, LabelEncoding};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Per-run limits threaded into the worker.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Cardinality threshold for the classification fallback and for
    /// stratified-split eligibility.
    pub class_cardinality_threshold: usize,
    /// After this long, the worker logs a slow-evaluation warning at the
    /// next stage boundary.
    pub soft_timeout: Duration,
    /// Hard execution ceiling; expiry fails the job through the normal
    /// failure path.
    pub hard_timeout: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            class_cardinality_threshold: DEFAULT_CLASS_CARDINALITY_THRESHOLD,
            soft_timeout: Duration::from_secs(300),
            hard_timeout: Duration::from_secs(900),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Execute one evaluation job to a terminal state.
///
/// Idempotent under at-least-once dispatch: a missing job row or one that
/// is no longer PENDING exits silently without touching the filesystem.
/// The returned error mirrors what was recorded on the job row; callers
/// use it only for coarse task-state reporting.
pub async fn run_evaluation(
    pool: &PgPool,
    layout: &StorageLayout,
    config: &EvaluatorConfig,
    spec: &EvaluationSpec,
    progress: ProgressReporter,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    let job_id = spec.job_id;

    let Some(_job) = JobRepo::find_by_id(pool, job_id).await? else {
        tracing::debug!(job_id, "Job row not found; skipping evaluation");
        return Ok(());
    };
    if !JobRepo::begin_processing(pool, job_id).await? {
        tracing::debug!(job_id, "Job already claimed or terminal; skipping evaluation");
        return Ok(());
    }

    tracing::info!(job_id, "Evaluation started");
    let job_dir = layout.job_dir(job_id);

    let outcome = match tokio::time::timeout(
        config.hard_timeout,
        execute(pool, layout, config, spec, &job_dir, &progress, &cancel),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(PipelineError::TimedOut(config.hard_timeout.as_secs())),
    };

    let result = match outcome {
        Ok(()) => {
            tracing::info!(job_id, "Evaluation completed");
            Ok(())
        }
        Err(e) => {
            tracing::error!(job_id, error = %e, "Evaluation failed");
            if let Err(db_err) = JobRepo::fail(pool, job_id, &e.to_string()).await {
                // Do not mask the original failure with a store error.
                tracing::error!(job_id, error = %db_err, "Failed to record job failure");
            }
            // No partial artifacts survive a failed run.
            if let Err(rm_err) = tokio::fs::remove_dir_all(&job_dir).await {
                if rm_err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(job_id, error = %rm_err, "Failed to remove job directory");
                }
            }
            Err(e)
        }
    };

    // The original uploaded inputs are deleted unconditionally.
    remove_file_quiet(&spec.package_path).await;
    remove_file_quiet(&spec.dataset_path).await;

    result
}

// ---------------------------------------------------------------------------
// Stage execution
// ---------------------------------------------------------------------------

/// Target handling for the run, decided once and threaded through scoring,
/// plotting, and insight selection.
enum TargetData {
    Classification { encoding: LabelEncoding },
    Regression,
}

async fn execute(
    pool: &PgPool,
    layout: &StorageLayout,
    config: &EvaluatorConfig,
    spec: &EvaluationSpec,
    job_dir: &Path,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    let job_id = spec.job_id;
    let started = Instant::now();
    let mut soft_warned = false;

    // 1. Permanent job directory + package extraction.
    progress.update(5, "Extracting package");
    tokio::fs::create_dir_all(job_dir).await?;
    {
        let package = PathBuf::from(&spec.package_path);
        let dir = job_dir.to_path_buf();
        run_blocking(move || {
            let file = std::fs::File::open(&package)?;
            let mut archive = zip::ZipArchive::new(file)?;
            archive.extract(&dir)?;
            Ok(())
        })
        .await?;
    }
    checkpoint(cancel, config, started, &mut soft_warned, job_id)?;

    // 2. Locate artifacts inside the extracted tree.
    let model_path =
        find_artifact(job_dir, MODEL_ARTIFACT_NAMES).ok_or(PipelineError::ArtifactNotFound)?;
    let preprocessor_path = find_artifact(job_dir, PREPROCESSOR_ARTIFACT_NAMES);

    // 3. Load the model object and the dataset.
    progress.update(15, "Loading model and dataset");
    let (estimator, frame) = {
        let dataset = PathBuf::from(&spec.dataset_path);
        run_blocking(move || {
            let estimator = artifact::load_estimator(&model_path)?;
            let frame = Frame::from_csv_path(&dataset)?;
            Ok((estimator, frame))
        })
        .await?
    };
    checkpoint(cancel, config, started, &mut soft_warned, job_id)?;

    // 4. Validate the target column; the unsplit frame is released here.
    let (features, target) = frame.split_target(&spec.target_column)?;

    let distinct = target.distinct_count();
    let discrete = target.is_discrete();
    let task = resolve_task_kind(
        estimator.declared_task(),
        distinct,
        discrete,
        config.class_cardinality_threshold,
    );

    // 5. Train/test split, stratified for low-cardinality discrete targets.
    let (train_idx, test_idx) = if spec.split_data {
        let stratify = discrete && distinct < config.class_cardinality_threshold;
        let labels = if stratify { Some(target.labels()?) } else { None };
        let split = train_test_split(features.n_rows(), TEST_FRACTION, labels.as_deref())?;
        (split.train, split.test)
    } else {
        // No split: the full set serves as both train and test.
        let all: Vec<usize> = (0..features.n_rows()).collect();
        (all.clone(), all)
    };

    let train_features = features.select_rows(&train_idx);
    let test_features = features.select_rows(&test_idx);
    let train_target = target.select_rows(&train_idx);
    let test_target = target.select_rows(&test_idx);

    // 6. Resolve the preprocessor: supplied artifact or synthesized.
    let mut insights: Vec<String> = Vec::new();
    let transformer: Option<Box<dyn Transformer>> = match preprocessor_path {
        Some(path) => Some(artifact::load_transformer(&path)?),
        None => match build_auto_preprocessor(&train_features) {
            Some(auto) => {
                insights.push(
                    "An automatic preprocessing pipeline was built and fitted on the dataset."
                        .to_string(),
                );
                Some(Box::new(auto))
            }
            None => {
                insights.push("No preprocessing was needed for this dataset.".to_string());
                None
            }
        },
    };

    // 7. Fit the preprocessor on train, transform both partitions.
    progress.update(35, "Preprocessing");
    checkpoint(cancel, config, started, &mut soft_warned, job_id)?;
    let (x_train, x_test) = {
        let train = train_features;
        let test = test_features;
        run_blocking(move || match transformer {
            Some(mut t) => {
                t.fit(&train)?;
                Ok((t.transform(&train)?, t.transform(&test)?))
            }
            // Empty feature set: zero-width rows.
            None => Ok((
                vec![Vec::new(); train.n_rows()],
                vec![Vec::new(); test.n_rows()],
            )),
        })
        .await?
    };

    // Encode the target per the resolved task kind.
    let (target_data, y_train, y_test) = match task {
        TaskKind::Classification => {
            let train_labels = train_target.labels()?;
            let test_labels = test_target.labels()?;
            let mut all_labels = train_labels.clone();
            all_labels.extend(test_labels.iter().cloned());
            let encoding = LabelEncoding::fit(&all_labels, estimator.classes());
            let y_train = encoding.encode(&train_labels);
            let y_test = encoding.encode(&test_labels);
            (TargetData::Classification { encoding }, y_train, y_test)
        }
        TaskKind::Regression => (
            TargetData::Regression,
            train_target.numeric_values()?,
            test_target.numeric_values()?,
        ),
    };

    // 8. Fit when splitting was requested; always predict on test; probe
    // probability output if the model exposes it.
    progress.update(55, "Scoring model");
    checkpoint(cancel, config, started, &mut soft_warned, job_id)?;
    let (y_pred, y_proba) = {
        let mut est = estimator;
        let fit_requested = spec.split_data;
        let x_test_owned = x_test;
        let y_train_owned = y_train;
        run_blocking(move || {
            if fit_requested {
                est.fit(&x_train, &y_train_owned)?;
            }
            let y_pred = est.predict(&x_test_owned)?;
            let y_proba = if est.supports_proba() {
                Some(est.predict_proba(&x_test_owned)?)
            } else {
                None
            };
            Ok((y_pred, y_proba))
        })
        .await?
    };

    // 9-10. Task-appropriate metric set.
    progress.update(75, "Computing metrics");
    let mut metric_map: BTreeMap<String, f64> = BTreeMap::new();
    match &target_data {
        TargetData::Classification { encoding } => {
            metric_map.insert(
                METRIC_ACCURACY.to_string(),
                metrics::round4(metrics::accuracy(&y_test, &y_pred)),
            );
            metric_map.insert(
                METRIC_F1_SCORE.to_string(),
                metrics::round4(metrics::weighted_f1(&y_test, &y_pred)),
            );

            // AUC only when computable: binary target with two-column
            // probability output.
            if let Some(proba) = &y_proba {
                let binary = encoding.n_classes() == 2
                    && proba.first().map(|row| row.len() == 2).unwrap_or(false);
                if binary {
                    let scores: Vec<f64> = proba.iter().map(|row| row[1]).collect();
                    if let Some(auc) = metrics::roc_auc_binary(&y_test, &scores) {
                        metric_map.insert(METRIC_AUC.to_string(), metrics::round4(auc));
                    } else {
                        tracing::debug!(job_id, "AUC skipped: single-class test partition");
                    }
                } else {
                    tracing::debug!(
                        job_id,
                        "AUC skipped: not a binary target with two-column probabilities"
                    );
                }
            }
        }
        TargetData::Regression => {
            metric_map.insert(
                METRIC_RMSE.to_string(),
                metrics::round4(metrics::rmse(&y_test, &y_pred)),
            );
            metric_map.insert(
                METRIC_R2_SCORE.to_string(),
                metrics::round4(metrics::r2_score(&y_test, &y_pred)),
            );
        }
    }

    // 10. Diagnostic plot. Rendering failure is non-fatal.
    progress.update(85, "Rendering diagnostics");
    let plot_url = render_plot(layout, spec, &target_data, job_dir, &y_test, &y_pred).await;

    // 11. Persist results, refresh the model snapshot, append history.
    insights.extend(generate_insights(task, &metric_map));
    let metrics_json = serde_json::to_value(&metric_map)?;
    let mut results = metrics_json.clone();
    if let Some(object) = results.as_object_mut() {
        object.insert(
            RESULT_KEY_INSIGHTS.to_string(),
            serde_json::to_value(&insights)?,
        );
    }
    let artifacts = serde_json::json!({ "plot_url": plot_url });

    if !JobRepo::complete(pool, job_id, &results, &artifacts).await? {
        tracing::warn!(job_id, "Job left PROCESSING before completion; results dropped");
        return Ok(());
    }
    ModelVersionRepo::update_latest_metrics(pool, spec.model_version_id, &metrics_json, task.as_str())
        .await?;
    MetricRecordRepo::append(pool, spec.model_version_id, &metrics_json).await?;

    progress.update(100, "Evaluation completed");
    Ok(())
}

/// Render the task-appropriate plot into the job directory and return its
/// relative artifact reference, or `None` when rendering fails.
async fn render_plot(
    layout: &StorageLayout,
    spec: &EvaluationSpec,
    target_data: &TargetData,
    job_dir: &Path,
    y_test: &[f64],
    y_pred: &[f64],
) -> Option<String> {
    let job_id = spec.job_id;
    let dir = job_dir.to_path_buf();
    let y_true = y_test.to_vec();
    let y_hat = y_pred.to_vec();

    let (filename, result) = match target_data {
        TargetData::Classification { encoding } => {
            let classes = encoding.classes().to_vec();
            let rendered = run_blocking(move || {
                plot::render_confusion_matrix(
                    &dir.join(CONFUSION_MATRIX_FILE),
                    &classes,
                    &y_true,
                    &y_hat,
                )
            })
            .await;
            (CONFUSION_MATRIX_FILE, rendered)
        }
        TargetData::Regression => {
            let rendered = run_blocking(move || {
                plot::render_regression_scatter(&dir.join(REGRESSION_PLOT_FILE), &y_true, &y_hat)
            })
            .await;
            (REGRESSION_PLOT_FILE, rendered)
        }
    };

    match result {
        Ok(()) => Some(layout.artifact_url(job_id, filename)),
        Err(e) => {
            tracing::warn!(job_id, error = %e, "Plot rendering failed; completing without artifact");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Offload a CPU/IO-bound stage to the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))?
}

/// Between-stage suspension point: observe cancellation and the soft
/// ceiling. Cancellation after the final checkpoint lets the job run to
/// completion, per the dispatch contract.
fn checkpoint(
    cancel: &CancellationToken,
    config: &EvaluatorConfig,
    started: Instant,
    soft_warned: &mut bool,
    job_id: i64,
) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    if !*soft_warned && started.elapsed() > config.soft_timeout {
        tracing::warn!(
            job_id,
            elapsed_secs = started.elapsed().as_secs(),
            "Evaluation exceeded the soft time ceiling"
        );
        *soft_warned = true;
    }
    Ok(())
}

/// Walk the extracted tree for the first file matching a known name.
fn find_artifact(dir: &Path, names: &[&str]) -> Option<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| {
            entry.file_type().is_file()
                && names
                    .iter()
                    .any(|name| entry.file_name().to_string_lossy() == *name)
        })
        .map(|entry| entry.into_path())
}

async fn remove_file_quiet(path: &str) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path, error = %e, "Failed to remove staged input file");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_artifact_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("bundle/inner");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("model.json"), "{}").unwrap();

        let found = find_artifact(dir.path(), MODEL_ARTIFACT_NAMES).unwrap();
        assert!(found.ends_with("bundle/inner/model.json"));
        assert!(find_artifact(dir.path(), PREPROCESSOR_ARTIFACT_NAMES).is_none());
    }

    #[test]
    fn checkpoint_observes_cancellation() {
        let cancel = CancellationToken::new();
        let config = EvaluatorConfig::default();
        let mut warned = false;

        assert!(checkpoint(&cancel, &config, Instant::now(), &mut warned, 1).is_ok());
        cancel.cancel();
        let err = checkpoint(&cancel, &config, Instant::now(), &mut warned, 1).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn soft_ceiling_warns_once() {
        let cancel = CancellationToken::new();
        let config = EvaluatorConfig {
            soft_timeout: Duration::ZERO,
            ..EvaluatorConfig::default()
        };
        let mut warned = false;
        let started = Instant::now() - Duration::from_secs(1);

        checkpoint(&cancel, &config, started, &mut warned, 1).unwrap();
        assert!(warned);
    }
}
