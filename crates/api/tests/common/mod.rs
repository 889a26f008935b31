use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;

use evalhub_api::config::ServerConfig;
use evalhub_api::router::build_app_router;
use evalhub_api::state::AppState;
use evalhub_pipeline::dispatcher::TaskDispatcher;
use evalhub_pipeline::layout::StorageLayout;
use evalhub_pipeline::storage::StorageLifecycle;

/// A test application with its own temporary storage base.
pub struct TestApp {
    pub router: Router,
    /// Keeps the storage base alive for the duration of the test.
    pub _storage_dir: tempfile::TempDir,
}

/// Build a test `ServerConfig` with safe defaults and the given storage
/// base.
pub fn test_config(storage_base: &str) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        storage_base: storage_base.to_string(),
        max_model_size_mb: 100,
        worker_concurrency: 2,
        soft_timeout_secs: 300,
        hard_timeout_secs: 900,
        class_cardinality_threshold: 30,
    }
}

/// Build the full application router with all middleware layers, using the
/// given database pool and a fresh temporary storage base.
///
/// This mirrors the construction in `main.rs` so integration tests
/// exercise the same middleware stack and dispatcher wiring that
/// production uses.
pub fn build_test_app(pool: PgPool) -> TestApp {
    let storage_dir = tempfile::tempdir().expect("create temp storage dir");
    let base = storage_dir.path().join("uploads");
    let config = test_config(&base.to_string_lossy());

    let layout = StorageLayout::new(base);
    layout.ensure_roots().expect("create storage roots");
    let storage = Arc::new(StorageLifecycle::new(layout.clone()));
    let dispatcher = TaskDispatcher::new(pool.clone(), layout, config.dispatcher_config());

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        dispatcher,
        storage,
    };

    TestApp {
        router: build_app_router(state, &config),
        _storage_dir: storage_dir,
    }
}

/// Append one multipart file part.
pub fn push_file_part(body: &mut Vec<u8>, boundary: &str, name: &str, filename: &str, bytes: &[u8]) {
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; \
             filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(b"\r\n");
}

/// Append one multipart text part.
pub fn push_text_part(body: &mut Vec<u8>, boundary: &str, name: &str, value: &str) {
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
            .as_bytes(),
    );
}

/// Close the multipart body.
pub fn finish_multipart(body: &mut Vec<u8>, boundary: &str) {
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
}
