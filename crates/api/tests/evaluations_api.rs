mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

const BOUNDARY: &str = "evalhub-test-boundary";

const LOGISTIC_MODEL: &str = r#"{
    "algorithm": "logistic_regression",
    "params": {"classes": ["no", "yes"]}
}"#;

fn classification_csv(rows: usize) -> String {
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

fn submission_body(model_filename: &str) -> Vec<u8> {
    let mut body = Vec::new();
    common::push_file_part(
        &mut body,
        BOUNDARY,
        "model_file",
        model_filename,
        LOGISTIC_MODEL.as_bytes(),
    );
    common::push_file_part(
        &mut body,
        BOUNDARY,
        "dataset",
        "data.csv",
        classification_csv(20).as_bytes(),
    );
    common::push_text_part(&mut body, BOUNDARY, "target_column", "label");
    common::push_text_part(&mut body, BOUNDARY, "user_id", "user_1");
    common::push_text_part(&mut body, BOUNDARY, "model_name", "churn-classifier");
    common::push_text_part(&mut body, BOUNDARY, "split_data", "true");
    common::finish_multipart(&mut body, BOUNDARY);
    body
}

async fn post_submission(router: &Router, body: Vec<u8>) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/evaluations/start")
                .header(
                    CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

// ---------------------------------------------------------------------------
// Submission + polling end-to-end
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn submission_dispatches_and_reaches_completed(pool: PgPool) {
    let app = common::build_test_app(pool);

    let (status, body) = post_submission(&app.router, submission_body("model.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processing");
    let job_id = body["job_id"].as_i64().unwrap();
    let token = body["task_token"].as_str().unwrap().to_string();

    // Poll until the worker drives the job to a terminal state.
    let mut last_status = String::new();
    for _ in 0..300 {
        let (status, body) =
            get_json(&app.router, &format!("/api/v1/evaluations/{job_id}/status")).await;
        assert_eq!(status, StatusCode::OK);
        last_status = body["status"].as_str().unwrap().to_string();
        if last_status == "COMPLETED" || last_status == "FAILED" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(last_status, "COMPLETED");

    // Full results: metric set, insights, confusion-matrix artifact.
    let (status, body) =
        get_json(&app.router, &format!("/api/v1/evaluations/{job_id}/results")).await;
    assert_eq!(status, StatusCode::OK);
    let results = &body["data"]["results"];
    assert!(results["accuracy"].is_number());
    assert!(results["f1_score"].is_number());
    assert!(results["auc"].is_number());
    assert!(results["insights"].is_array());
    assert!(body["data"]["artifacts"]["plot_url"]
        .as_str()
        .unwrap()
        .contains("confusion_matrix.png"));

    // The dispatcher still reports the task under its correlation token.
    let (status, body) = get_json(
        &app.router,
        &format!("/api/v1/evaluations/task/{token}/status"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "succeeded");

    // Exactly one job and one model version exist afterwards.
    let (_, jobs) = get_json(&app.router, "/api/v1/evaluations?user_id=user_1").await;
    assert_eq!(jobs["data"].as_array().unwrap().len(), 1);
    let (_, models) = get_json(&app.router, "/api/v1/models?user_id=user_1").await;
    assert_eq!(models["data"].as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Synchronous validation errors
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn disallowed_model_extension_is_rejected(pool: PgPool) {
    let app = common::build_test_app(pool.clone());

    let (status, body) = post_submission(&app.router, submission_body("model.exe")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "FILE_TYPE_NOT_ALLOWED");

    // Nothing persisted: no job row, no model version, no temp files.
    let jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM evaluation_jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(jobs, 0);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn missing_form_field_is_a_bad_request(pool: PgPool) {
    let app = common::build_test_app(pool);

    let mut body = Vec::new();
    common::push_text_part(&mut body, BOUNDARY, "user_id", "user_1");
    common::finish_multipart(&mut body, BOUNDARY);

    let (status, json) = post_submission(&app.router, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn listing_requires_user_id(pool: PgPool) {
    let app = common::build_test_app(pool);
    let (status, _) = get_json(&app.router, "/api/v1/evaluations").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Missing resources
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn unknown_job_is_not_found(pool: PgPool) {
    let app = common::build_test_app(pool);

    let (status, body) = get_json(&app.router, "/api/v1/evaluations/424242/status").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = get_json(&app.router, "/api/v1/evaluations/424242/results").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn unknown_task_token_is_not_found(pool: PgPool) {
    let app = common::build_test_app(pool);
    let token = uuid::Uuid::new_v4();

    let (status, _) = get_json(
        &app.router,
        &format!("/api/v1/evaluations/task/{token}/status"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::post(format!("/api/v1/evaluations/task/{token}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
