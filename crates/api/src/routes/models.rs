//! Route definitions for model versions (PRD-01, PRD-05).

use axum::routing::get;
use axum::Router;

use crate::handlers::models;
use crate::state::AppState;

/// Routes mounted at `/models`.
///
/// ```text
/// GET    /               -> list_models
/// GET    /{id}           -> get_model
/// DELETE /{id}           -> delete_model
/// GET    /{id}/insights  -> get_model_insights
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(models::list_models))
        .route("/{id}", get(models::get_model).delete(models::delete_model))
        .route("/{id}/insights", get(models::get_model_insights))
}
