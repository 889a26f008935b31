//! Task-type resolution for evaluation runs (PRD-03).
//!
//! A job is scored either as classification or regression. The decision is
//! made exactly once per run and threaded through metric computation, plot
//! selection, and insight generation.

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Database string for classification models.
pub const TASK_CLASSIFICATION: &str = "classification";

/// Database string for regression models.
pub const TASK_REGRESSION: &str = "regression";

/// Fallback cardinality threshold: a discrete target with fewer distinct
/// values than this is treated as a classification target when the model
/// does not declare its own type. Overridable via
/// `CLASS_CARDINALITY_THRESHOLD`.
pub const DEFAULT_CLASS_CARDINALITY_THRESHOLD: usize = 30;

// ---------------------------------------------------------------------------
// TaskKind
// ---------------------------------------------------------------------------

/// The kind of evaluation task, decided once per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Classification,
    Regression,
}

impl TaskKind {
    /// Database / API string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classification => TASK_CLASSIFICATION,
            Self::Regression => TASK_REGRESSION,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve the task kind for an evaluation run.
///
/// An explicit model-declared type always wins. Otherwise the target column
/// decides: classification iff it is discrete (integer-coded or text) and
/// has fewer than `cardinality_threshold` distinct values.
pub fn resolve_task_kind(
    declared: Option<TaskKind>,
    distinct_values: usize,
    discrete_target: bool,
    cardinality_threshold: usize,
) -> TaskKind {
    if let Some(kind) = declared {
        return kind;
    }
    if discrete_target && distinct_values < cardinality_threshold {
        TaskKind::Classification
    } else {
        TaskKind::Regression
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
