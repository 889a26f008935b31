use std::sync::Arc;

use evalhub_pipeline::dispatcher::TaskDispatcher;
use evalhub_pipeline::storage::StorageLifecycle;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: evalhub_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Task dispatcher owning the evaluation worker pool.
    pub dispatcher: Arc<TaskDispatcher>,
    /// Storage lifecycle manager for the upload/artifact base.
    pub storage: Arc<StorageLifecycle>,
}
