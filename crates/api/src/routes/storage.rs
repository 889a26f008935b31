//! Route definitions for storage lifecycle management (PRD-04).

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::storage;
use crate::state::AppState;

/// Routes mounted at `/storage`.
///
/// ```text
/// GET    /usage             -> get_usage
/// POST   /sweep             -> sweep (by age, default 7 days)
/// POST   /sweep/emergency   -> emergency_sweep
/// POST   /sweep/incomplete  -> purge_incomplete
/// DELETE /models/{id}       -> purge_model
/// GET    /trend             -> get_trend
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/usage", get(storage::get_usage))
        .route("/sweep", post(storage::sweep))
        .route("/sweep/emergency", post(storage::emergency_sweep))
        .route("/sweep/incomplete", post(storage::purge_incomplete))
        .route("/models/{id}", delete(storage::purge_model))
        .route("/trend", get(storage::get_trend))
}
