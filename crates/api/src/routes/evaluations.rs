//! Route definitions for evaluation submission and polling (PRD-01, PRD-02).

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::evaluations;
use crate::state::AppState;

/// Routes mounted at `/evaluations`.
///
/// ```text
/// POST /start                  -> start_evaluation
/// GET  /                       -> list_evaluations
/// GET  /{id}/status            -> get_job_status
/// GET  /{id}/results           -> get_job_results
/// GET  /task/{token}/status    -> get_task_status
/// POST /task/{token}/cancel    -> cancel_task
/// ```
///
/// The submission route carries its own body limit sized for the model,
/// dataset, and preprocessor uploads.
pub fn router(upload_body_limit: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/start",
            post(evaluations::start_evaluation).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/", get(evaluations::list_evaluations))
        .route("/{id}/status", get(evaluations::get_job_status))
        .route("/{id}/results", get(evaluations::get_job_results))
        .route("/task/{token}/status", get(evaluations::get_task_status))
        .route("/task/{token}/cancel", post(evaluations::cancel_task))
}
