//! Route definitions, one module per resource.

pub mod evaluations;
pub mod health;
pub mod models;
pub mod storage;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /evaluations/start                  submit (multipart, POST)
/// /evaluations                        list jobs (GET)
/// /evaluations/{id}/status            coarse job status (GET)
/// /evaluations/{id}/results           full job record (GET)
/// /evaluations/task/{token}/status    dispatcher status (GET)
/// /evaluations/task/{token}/cancel    best-effort cancel (POST)
///
/// /models                             list model versions (GET)
/// /models/{id}                        model detail (GET), delete (DELETE)
/// /models/{id}/insights               regenerate insights (GET)
///
/// /storage/usage                      usage snapshot (GET)
/// /storage/sweep                      aged sweep (POST)
/// /storage/sweep/emergency            two-pass emergency sweep (POST)
/// /storage/sweep/incomplete           incomplete-job purge (POST)
/// /storage/models/{id}                per-model purge (DELETE)
/// /storage/trend                      usage trend (GET)
/// ```
pub fn api_routes(upload_body_limit: usize) -> Router<AppState> {
    Router::new()
        .nest("/evaluations", evaluations::router(upload_body_limit))
        .nest("/models", models::router())
        .nest("/storage", storage::router())
}
