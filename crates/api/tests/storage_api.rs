mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

async fn request_json(
    router: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[sqlx::test(migrations = "../db/migrations")]
async fn usage_reports_capacity_and_alert_level(pool: PgPool) {
    let app = common::build_test_app(pool);

    let (status, body) = request_json(&app.router, "GET", "/api/v1/storage/usage").await;
    assert_eq!(status, StatusCode::OK);

    let data = &body["data"];
    assert!(data["total_mb"].as_u64().unwrap() > 0);
    assert!(data["free_mb"].is_number());
    let level = data["alert_level"].as_str().unwrap();
    assert!(["normal", "warning", "high_warning", "critical"].contains(&level));
}

#[sqlx::test(migrations = "../db/migrations")]
async fn sweep_is_idempotent(pool: PgPool) {
    let app = common::build_test_app(pool);

    let (status, first) = request_json(&app.router, "POST", "/api/v1/storage/sweep?days=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["removed_files"], 0);

    let (status, second) = request_json(&app.router, "POST", "/api/v1/storage/sweep?days=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["removed_files"], 0);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn incomplete_purge_runs_clean_on_empty_root(pool: PgPool) {
    let app = common::build_test_app(pool);

    let (status, body) =
        request_json(&app.router, "POST", "/api/v1/storage/sweep/incomplete").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["removed_dirs"].as_array().unwrap().is_empty());
    assert!(body["data"]["errors"].as_array().unwrap().is_empty());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn model_purge_is_idempotent_for_unknown_models(pool: PgPool) {
    let app = common::build_test_app(pool);

    let (status, body) =
        request_json(&app.router, "DELETE", "/api/v1/storage/models/999").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed_dirs"], 0);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn trend_reports_window(pool: PgPool) {
    let app = common::build_test_app(pool);

    let (status, body) = request_json(&app.router, "GET", "/api/v1/storage/trend?hours=24").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["period_hours"], 24);
    assert!(body["data"]["data_points"].is_number());
}
