use std::time::Duration;

use evalhub_core::storage::DEFAULT_MAX_MODEL_SIZE_MB;
use evalhub_core::task_type::DEFAULT_CLASS_CARDINALITY_THRESHOLD;
use evalhub_pipeline::dispatcher::DispatcherConfig;
use evalhub_pipeline::evaluator::EvaluatorConfig;
use evalhub_pipeline::layout::DEFAULT_STORAGE_BASE;
use evalhub_pipeline::staging::StagingLimits;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Base directory for staged uploads and job artifacts.
    pub storage_base: String,
    /// Ceiling for uploaded model artifacts in MB.
    pub max_model_size_mb: u64,
    /// Concurrent evaluation worker slots.
    pub worker_concurrency: usize,
    /// Soft evaluation ceiling in seconds (warning only).
    pub soft_timeout_secs: u64,
    /// Hard evaluation ceiling in seconds (fails the job).
    pub hard_timeout_secs: u64,
    /// Cardinality threshold for the classification fallback.
    pub class_cardinality_threshold: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default       |
    /// |-------------------------------|---------------|
    /// | `HOST`                        | `0.0.0.0`     |
    /// | `PORT`                        | `3000`        |
    /// | `CORS_ORIGINS`                | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`        | `30`          |
    /// | `STORAGE_BASE`                | `var/uploads` |
    /// | `MAX_MODEL_SIZE_MB`           | `100`         |
    /// | `WORKER_CONCURRENCY`          | `4`           |
    /// | `SOFT_TIMEOUT_SECS`           | `300`         |
    /// | `HARD_TIMEOUT_SECS`           | `900`         |
    /// | `CLASS_CARDINALITY_THRESHOLD` | `30`          |
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: parse_env("PORT", 3000),
            cors_origins: env_or("CORS_ORIGINS", "http://localhost:5173")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 30),
            storage_base: env_or("STORAGE_BASE", DEFAULT_STORAGE_BASE),
            max_model_size_mb: parse_env("MAX_MODEL_SIZE_MB", DEFAULT_MAX_MODEL_SIZE_MB),
            worker_concurrency: parse_env("WORKER_CONCURRENCY", 4),
            soft_timeout_secs: parse_env("SOFT_TIMEOUT_SECS", 300),
            hard_timeout_secs: parse_env("HARD_TIMEOUT_SECS", 900),
            class_cardinality_threshold: parse_env(
                "CLASS_CARDINALITY_THRESHOLD",
                DEFAULT_CLASS_CARDINALITY_THRESHOLD,
            ),
        }
    }

    /// Dispatcher configuration derived from the server config.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_concurrency: self.worker_concurrency,
            evaluator: EvaluatorConfig {
                class_cardinality_threshold: self.class_cardinality_threshold,
                soft_timeout: Duration::from_secs(self.soft_timeout_secs),
                hard_timeout: Duration::from_secs(self.hard_timeout_secs),
            },
        }
    }

    /// Staging limits derived from the server config.
    pub fn staging_limits(&self) -> StagingLimits {
        StagingLimits {
            max_model_size_mb: self.max_model_size_mb,
            ..StagingLimits::default()
        }
    }

    /// Request body ceiling for the multipart submission route: room for
    /// the model, dataset, and preprocessor plus framing overhead.
    pub fn upload_body_limit_bytes(&self) -> usize {
        (self.max_model_size_mb as usize * 3 + 16) * 1024 * 1024
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
