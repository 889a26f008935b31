//! Health check handler.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// GET /health
///
/// Verifies database connectivity. Returns 200 when healthy, 503 when the
/// database is unreachable.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_healthy = evalhub_db::health_check(&state.pool).await.is_ok();

    let status = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if db_healthy { "healthy" } else { "unhealthy" },
            "database": if db_healthy { "healthy" } else { "unhealthy" },
        })),
    )
}
