//! End-to-end worker protocol tests: staged package + dataset on disk,
//! job row in the database, then a full evaluation run.

use std::io::Write as _;
use std::path::PathBuf;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use evalhub_db::models::job::NewJob;
use evalhub_db::models::model_version::NewModelVersion;
use evalhub_db::models::status::JobStatus;
use evalhub_db::repositories::{JobRepo, MetricRecordRepo, ModelVersionRepo};
use evalhub_pipeline::dispatcher::{EvaluationSpec, ProgressReporter};
use evalhub_pipeline::evaluator::{run_evaluation, EvaluatorConfig};
use evalhub_pipeline::layout::StorageLayout;

struct Fixture {
    _dir: tempfile::TempDir,
    layout: StorageLayout,
    package_path: PathBuf,
    dataset_path: PathBuf,
}

/// Write a staged package (model + optional preprocessor) and dataset
/// into a fresh storage layout, mirroring what the stager produces.
fn stage_fixture(model_json: &str, preprocessor_json: Option<&str>, dataset_csv: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path().join("uploads"));
    layout.ensure_roots().unwrap();

    let package_path = layout.temp_root().join("user_1_abcd1234_package.zip");
    let file = std::fs::File::create(&package_path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    writer.start_file("model.json", options).unwrap();
    writer.write_all(model_json.as_bytes()).unwrap();
    if let Some(preprocessor) = preprocessor_json {
        writer.start_file("preprocessor.json", options).unwrap();
        writer.write_all(preprocessor.as_bytes()).unwrap();
    }
    writer.finish().unwrap();

    let dataset_path = layout.temp_root().join("user_1_abcd1234_data.csv");
    std::fs::write(&dataset_path, dataset_csv).unwrap();

    Fixture {
        _dir: dir,
        layout,
        package_path,
        dataset_path,
    }
}

/// Create the model-version and job rows for a staged fixture.
async fn create_job(
    pool: &PgPool,
    fixture: &Fixture,
    target_column: &str,
    split_data: bool,
) -> EvaluationSpec {
    let model = ModelVersionRepo::create(
        pool,
        &NewModelVersion {
            owner_id: "user_1".to_string(),
            name: "fixture-model".to_string(),
            version: "v1".to_string(),
            package_path: fixture.package_path.display().to_string(),
        },
    )
    .await
    .unwrap();

    let job = JobRepo::create(
        pool,
        &NewJob {
            owner_id: "user_1".to_string(),
            model_name: "fixture-model".to_string(),
            model_version_id: model.id,
            package_path: fixture.package_path.display().to_string(),
            dataset_path: fixture.dataset_path.display().to_string(),
            target_column: target_column.to_string(),
            split_data,
        },
    )
    .await
    .unwrap();

    EvaluationSpec {
        job_id: job.id,
        model_version_id: model.id,
        package_path: fixture.package_path.display().to_string(),
        dataset_path: fixture.dataset_path.display().to_string(),
        target_column: target_column.to_string(),
        split_data,
    }
}

async fn run(pool: &PgPool, layout: &StorageLayout, spec: &EvaluationSpec) {
    // The evaluator records failures on the job row; the returned error is
    // only for dispatcher task-state bookkeeping.
    let _ = run_evaluation(
        pool,
        layout,
        &EvaluatorConfig::default(),
        spec,
        ProgressReporter::noop(),
        CancellationToken::new(),
    )
    .await;
}

fn classification_csv(rows: usize) -> String {
    // Trivially separable: the feature equals the class.
    let mut csv = String::from("feature,label\n");
    for i in 0..rows {
        if i % 2 == 0 {
            csv.push_str("0,no\n");
        } else {
            csv.push_str("1,yes\n");
        }
    }
    csv
}

const LOGISTIC_MODEL: &str = r#"{
    "algorithm": "logistic_regression",
    "params": {"classes": ["no", "yes"]}
}"#;

const MAJORITY_MODEL: &str = r#"{
    "algorithm": "majority_class",
    "params": {"classes": ["no", "yes"]}
}"#;

const LINEAR_MODEL: &str = r#"{
    "algorithm": "linear_regression",
    "params": {"coefficients": [3.0], "intercept": 2.0}
}"#;

const PASSTHROUGH_PREPROCESSOR: &str = r#"{"algorithm": "passthrough"}"#;

fn regression_csv(rows: usize) -> String {
    // Noiseless linear relationship: price = 3 * size + 2.
    let mut csv = String::from("size,price\n");
    for i in 0..rows {
        csv.push_str(&format!("{},{}\n", i, 3 * i + 2));
    }
    csv
}

// ---------------------------------------------------------------------------
// Classification end-to-end
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn classification_with_split_completes_with_full_metric_set(pool: PgPool) {
    let fixture = stage_fixture(LOGISTIC_MODEL, None, &classification_csv(20));
    let spec = create_job(&pool, &fixture, "label", true).await;

    run(&pool, &fixture.layout, &spec).await;

    let job = JobRepo::find_by_id(&pool, spec.job_id).await.unwrap().unwrap();
    assert_eq!(job.status_id, JobStatus::Completed.id());
    assert!(job.error_message.is_none());
    assert!(job.completed_at.is_some());

    let results = job.results.unwrap();
    // Separable data: the fitted classifier scores perfectly.
    assert_eq!(results["accuracy"], serde_json::json!(1.0));
    assert_eq!(results["f1_score"], serde_json::json!(1.0));
    assert_eq!(results["auc"], serde_json::json!(1.0));

    let insights = results["insights"].as_array().unwrap();
    assert!(insights
        .iter()
        .any(|i| i.as_str().unwrap().contains("automatic preprocessing pipeline")));

    // Plot artifact referenced relative to the artifact root, and present
    // in the permanent job directory.
    let artifacts = job.artifacts.unwrap();
    let plot_url = artifacts["plot_url"].as_str().unwrap();
    assert_eq!(
        plot_url,
        format!("eval_jobs/{}/confusion_matrix.png", spec.job_id)
    );
    assert!(fixture
        .layout
        .job_dir(spec.job_id)
        .join("confusion_matrix.png")
        .exists());

    // Model snapshot refreshed and one metric record appended.
    let model = ModelVersionRepo::find_by_id(&pool, spec.model_version_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(model.task_type.as_deref(), Some("classification"));
    assert!(model.latest_metrics.is_some());

    let records = MetricRecordRepo::list_for_model(&pool, spec.model_version_id)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);

    // Original uploaded inputs are gone; the job directory survives.
    assert!(!fixture.package_path.exists());
    assert!(!fixture.dataset_path.exists());
    assert!(fixture.layout.job_dir(spec.job_id).exists());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn classifier_without_probability_output_omits_auc(pool: PgPool) {
    let fixture = stage_fixture(MAJORITY_MODEL, None, &classification_csv(20));
    let spec = create_job(&pool, &fixture, "label", true).await;

    run(&pool, &fixture.layout, &spec).await;

    let job = JobRepo::find_by_id(&pool, spec.job_id).await.unwrap().unwrap();
    assert_eq!(job.status_id, JobStatus::Completed.id());

    let results = job.results.unwrap();
    assert!(results.get("accuracy").is_some());
    assert!(results.get("f1_score").is_some());
    assert!(results.get("auc").is_none());
}

// ---------------------------------------------------------------------------
// Regression end-to-end
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn regression_without_split_completes_with_scatter_plot(pool: PgPool) {
    let fixture = stage_fixture(
        LINEAR_MODEL,
        Some(PASSTHROUGH_PREPROCESSOR),
        &regression_csv(10),
    );
    let spec = create_job(&pool, &fixture, "price", false).await;

    run(&pool, &fixture.layout, &spec).await;

    let job = JobRepo::find_by_id(&pool, spec.job_id).await.unwrap().unwrap();
    assert_eq!(job.status_id, JobStatus::Completed.id());

    // Pre-trained coefficients on a noiseless relationship: exact fit.
    let results = job.results.unwrap();
    assert_eq!(results["rmse"], serde_json::json!(0.0));
    assert_eq!(results["r2_score"], serde_json::json!(1.0));
    assert!(results.get("accuracy").is_none());

    let insights = results["insights"].as_array().unwrap();
    assert!(insights
        .iter()
        .any(|i| i.as_str().unwrap().contains("Strong R² score")));

    let artifacts = job.artifacts.unwrap();
    assert_eq!(
        artifacts["plot_url"].as_str().unwrap(),
        format!("eval_jobs/{}/regression_plot.png", spec.job_id)
    );
    assert!(fixture
        .layout
        .job_dir(spec.job_id)
        .join("regression_plot.png")
        .exists());

    let model = ModelVersionRepo::find_by_id(&pool, spec.model_version_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(model.task_type.as_deref(), Some("regression"));
}

// ---------------------------------------------------------------------------
// Failure paths
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn missing_target_column_fails_and_removes_job_dir(pool: PgPool) {
    let fixture = stage_fixture(LOGISTIC_MODEL, None, &classification_csv(20));
    let spec = create_job(&pool, &fixture, "nonexistent", true).await;

    run(&pool, &fixture.layout, &spec).await;

    let job = JobRepo::find_by_id(&pool, spec.job_id).await.unwrap().unwrap();
    assert_eq!(job.status_id, JobStatus::Failed.id());
    assert!(job
        .error_message
        .as_deref()
        .unwrap()
        .contains("nonexistent"));
    assert!(job.results.is_none());
    assert!(job.completed_at.is_some());

    // No partial artifacts survive, and the temp inputs are gone too.
    assert!(!fixture.layout.job_dir(spec.job_id).exists());
    assert!(!fixture.package_path.exists());
    assert!(!fixture.dataset_path.exists());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn package_without_model_artifact_fails(pool: PgPool) {
    let fixture = stage_fixture(LOGISTIC_MODEL, None, &classification_csv(10));
    // Overwrite the package with one missing model.json.
    let file = std::fs::File::create(&fixture.package_path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    writer
        .start_file("readme.txt", zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"nothing here").unwrap();
    writer.finish().unwrap();

    let spec = create_job(&pool, &fixture, "label", true).await;
    run(&pool, &fixture.layout, &spec).await;

    let job = JobRepo::find_by_id(&pool, spec.job_id).await.unwrap().unwrap();
    assert_eq!(job.status_id, JobStatus::Failed.id());
    assert!(job
        .error_message
        .as_deref()
        .unwrap()
        .contains("Model artifact not found"));
    assert!(!fixture.layout.job_dir(spec.job_id).exists());
}

// ---------------------------------------------------------------------------
// Idempotent re-entry
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn rerunning_a_completed_job_is_a_noop(pool: PgPool) {
    let fixture = stage_fixture(LOGISTIC_MODEL, None, &classification_csv(20));
    let spec = create_job(&pool, &fixture, "label", true).await;

    run(&pool, &fixture.layout, &spec).await;
    let first = JobRepo::find_by_id(&pool, spec.job_id).await.unwrap().unwrap();
    assert_eq!(first.status_id, JobStatus::Completed.id());

    // At-least-once delivery: the same job id arrives again.
    run(&pool, &fixture.layout, &spec).await;

    let second = JobRepo::find_by_id(&pool, spec.job_id).await.unwrap().unwrap();
    assert_eq!(second.status_id, JobStatus::Completed.id());
    assert_eq!(second.results, first.results);
    assert_eq!(second.completed_at, first.completed_at);
    // The artifact directory was not disturbed.
    assert!(fixture.layout.job_dir(spec.job_id).exists());

    // Still exactly one metric record.
    let records = MetricRecordRepo::list_for_model(&pool, spec.model_version_id)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn missing_job_row_exits_silently(pool: PgPool) {
    let fixture = stage_fixture(LOGISTIC_MODEL, None, &classification_csv(10));
    let spec = EvaluationSpec {
        job_id: 999_999,
        model_version_id: 1,
        package_path: fixture.package_path.display().to_string(),
        dataset_path: fixture.dataset_path.display().to_string(),
        target_column: "label".to_string(),
        split_data: true,
    };

    let result = run_evaluation(
        &pool,
        &fixture.layout,
        &EvaluatorConfig::default(),
        &spec,
        ProgressReporter::noop(),
        CancellationToken::new(),
    )
    .await;

    assert!(result.is_ok());
    // A no-op run leaves the staged inputs alone.
    assert!(fixture.package_path.exists());
    assert!(fixture.dataset_path.exists());
    assert!(!fixture.layout.job_dir(spec.job_id).exists());
}

// ---------------------------------------------------------------------------
// Unsupported fit
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn pretrained_regression_with_split_refits_on_train(pool: PgPool) {
    // With split=true the model must be refitted; least squares on the
    // noiseless relationship recovers it exactly again. 40 rows keeps the
    // integer-valued target above the cardinality threshold, so the split
    // is unstratified.
    let fixture = stage_fixture(
        LINEAR_MODEL,
        Some(PASSTHROUGH_PREPROCESSOR),
        &regression_csv(40),
    );
    let spec = create_job(&pool, &fixture, "price", true).await;

    run(&pool, &fixture.layout, &spec).await;

    let job = JobRepo::find_by_id(&pool, spec.job_id).await.unwrap().unwrap();
    assert_eq!(job.status_id, JobStatus::Completed.id());
    let results = job.results.unwrap();
    assert_eq!(results["r2_score"], serde_json::json!(1.0));
}
