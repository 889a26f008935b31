use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evalhub_api::config::ServerConfig;
use evalhub_api::router::build_app_router;
use evalhub_api::state::AppState;
use evalhub_api::background;
use evalhub_pipeline::dispatcher::TaskDispatcher;
use evalhub_pipeline::layout::StorageLayout;
use evalhub_pipeline::storage::StorageLifecycle;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evalhub_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = evalhub_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    evalhub_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    evalhub_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Storage layout ---
    let layout = StorageLayout::new(config.storage_base.clone());
    layout
        .ensure_roots()
        .expect("Failed to create storage directories");
    let storage = Arc::new(StorageLifecycle::new(layout.clone()));
    match storage.snapshot() {
        Ok(usage) => tracing::info!(
            free_mb = usage.free_mb,
            alert_level = usage.alert_level.as_str(),
            "Storage status on startup"
        ),
        Err(e) => tracing::warn!(error = %e, "Storage status unavailable on startup"),
    }

    // --- Dispatcher (worker pool) ---
    let dispatcher = TaskDispatcher::new(pool.clone(), layout, config.dispatcher_config());
    tracing::info!(
        worker_concurrency = config.worker_concurrency,
        "Task dispatcher started"
    );

    // --- Background tasks ---
    let background_cancel = tokio_util::sync::CancellationToken::new();
    let monitor_handle = tokio::spawn(background::storage_monitor::run(
        Arc::clone(&storage),
        background_cancel.clone(),
    ));
    let recovery_handle = tokio::spawn(background::recovery::run(
        pool.clone(),
        Arc::clone(&dispatcher),
        background_cancel.clone(),
    ));
    tracing::info!("Background tasks started (storage monitor, job recovery)");

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        dispatcher: Arc::clone(&dispatcher),
        storage: Arc::clone(&storage),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    background_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), monitor_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), recovery_handle).await;
    tracing::info!("Background tasks stopped");

    // Cancel in-flight evaluations; interrupted jobs are re-dispatched by
    // the recovery loop after the next start.
    dispatcher.shutdown();
    tracing::info!("Task dispatcher shut down");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
