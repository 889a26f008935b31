//! Task dispatcher and in-process worker pool (PRD-02).
//!
//! `dispatch` hands a staged job to a semaphore-bounded worker slot and
//! returns a correlation token immediately. The token addresses the
//! execution independently of the job row: `status` reports coarse state
//! plus worker-reported progress, `cancel` requests cooperative
//! termination. Delivery is at-least-once; the evaluator's idempotent
//! entry makes re-dispatch of the same job id a safe no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use evalhub_core::types::DbId;

use crate::evaluator::{self, EvaluatorConfig};
use crate::layout::StorageLayout;

/// Default number of concurrent worker slots.
const DEFAULT_MAX_CONCURRENCY: usize = 4;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Dispatcher configuration: worker-pool width plus the evaluator limits
/// threaded into every run.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrency: usize,
    pub evaluator: EvaluatorConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            evaluator: EvaluatorConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Task state
// ---------------------------------------------------------------------------

/// Coarse execution state of a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl ExecState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug)]
struct TaskState {
    state: ExecState,
    progress_percent: i16,
    progress_message: String,
    finished_at: Option<Instant>,
}

struct TaskEntry {
    state: Mutex<TaskState>,
    cancel: CancellationToken,
}

impl TaskEntry {
    fn new() -> Self {
        Self {
            state: Mutex::new(TaskState {
                state: ExecState::Queued,
                progress_percent: 0,
                progress_message: String::new(),
                finished_at: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    fn set_state(&self, state: ExecState) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.state = state;
        if state.is_terminal() {
            guard.finished_at = Some(Instant::now());
        }
    }
}

/// Status report for a correlation token.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusReport {
    pub task_token: Uuid,
    pub status: &'static str,
    pub progress: i16,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Handle the evaluator uses to publish progress onto the task registry.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    entry: Option<Arc<TaskEntry>>,
}

impl ProgressReporter {
    /// Reporter that discards updates. Used by tests and the recovery
    /// path before a registry entry exists.
    pub fn noop() -> Self {
        Self { entry: None }
    }

    fn for_entry(entry: Arc<TaskEntry>) -> Self {
        Self { entry: Some(entry) }
    }

    pub fn update(&self, percent: i16, message: &str) {
        if let Some(entry) = &self.entry {
            let mut guard = entry.state.lock().unwrap_or_else(|e| e.into_inner());
            guard.progress_percent = percent;
            guard.progress_message = message.to_string();
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch spec
// ---------------------------------------------------------------------------

/// Everything the worker needs to execute one staged job.
#[derive(Debug, Clone)]
pub struct EvaluationSpec {
    pub job_id: DbId,
    pub model_version_id: DbId,
    pub package_path: String,
    pub dataset_path: String,
    pub target_column: String,
    pub split_data: bool,
}

// ---------------------------------------------------------------------------
// TaskDispatcher
// ---------------------------------------------------------------------------

/// Owns the worker pool and the token registry.
pub struct TaskDispatcher {
    pool: PgPool,
    layout: StorageLayout,
    config: DispatcherConfig,
    slots: Arc<Semaphore>,
    tasks: Mutex<HashMap<Uuid, Arc<TaskEntry>>>,
}

impl TaskDispatcher {
    pub fn new(pool: PgPool, layout: StorageLayout, config: DispatcherConfig) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Arc::new(Self {
            pool,
            layout,
            config,
            slots,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Dispatch a staged job, generating a fresh correlation token.
    pub fn dispatch(self: &Arc<Self>, spec: EvaluationSpec) -> Uuid {
        let token = Uuid::new_v4();
        self.dispatch_with_token(token, spec);
        token
    }

    /// Dispatch a staged job under a pre-assigned correlation token.
    ///
    /// Returns immediately; execution begins once a worker slot frees up.
    pub fn dispatch_with_token(self: &Arc<Self>, token: Uuid, spec: EvaluationSpec) {
        let entry = Arc::new(TaskEntry::new());
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token, Arc::clone(&entry));

        tracing::info!(job_id = spec.job_id, %token, "Job dispatched to worker pool");

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(_permit) = dispatcher.slots.acquire().await else {
                // Semaphore closed: shutting down. Leave the job PENDING for
                // the recovery loop after restart.
                entry.set_state(ExecState::Failed);
                return;
            };

            entry.set_state(ExecState::Running);
            let reporter = ProgressReporter::for_entry(Arc::clone(&entry));
            let outcome = evaluator::run_evaluation(
                &dispatcher.pool,
                &dispatcher.layout,
                &dispatcher.config.evaluator,
                &spec,
                reporter,
                entry.cancel.clone(),
            )
            .await;

            match outcome {
                Ok(()) => entry.set_state(ExecState::Succeeded),
                Err(e) => {
                    tracing::debug!(job_id = spec.job_id, error = %e, "Worker finished with failure");
                    entry.set_state(ExecState::Failed);
                }
            }
        });
    }

    /// Coarse state + progress for a correlation token. `None` for tokens
    /// this process is not tracking.
    pub fn status(&self, token: Uuid) -> Option<TaskStatusReport> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let entry = tasks.get(&token)?;
        let guard = entry.state.lock().unwrap_or_else(|e| e.into_inner());
        Some(TaskStatusReport {
            task_token: token,
            status: guard.state.as_str(),
            progress: guard.progress_percent,
            message: guard.progress_message.clone(),
        })
    }

    /// Best-effort cooperative cancellation. Returns `false` for unknown
    /// tokens. The job row reaches a terminal state only via the worker's
    /// own completion/failure path.
    pub fn cancel(&self, token: Uuid) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        match tasks.get(&token) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether the registry holds an entry for this token. Used by the
    /// recovery loop to detect lost dispatches.
    pub fn is_tracked(&self, token: Uuid) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&token)
    }

    /// Drop terminal registry entries older than `max_age`, bounding
    /// registry growth. Returns the number pruned.
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let before = tasks.len();
        tasks.retain(|_, entry| {
            let guard = entry.state.lock().unwrap_or_else(|e| e.into_inner());
            match guard.finished_at {
                Some(finished) => finished.elapsed() < max_age,
                None => true,
            }
        });
        before - tasks.len()
    }

    /// Cancel every tracked task and stop accepting new work.
    pub fn shutdown(&self) {
        self.slots.close();
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for entry in tasks.values() {
            entry.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
