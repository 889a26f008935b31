//! Pipeline error types (PRD-03).
//!
//! Worker-execution errors are captured onto the job row by the evaluator's
//! top-level handler; they never propagate to the submitting request.

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The extracted package does not contain a model artifact.
    #[error("Model artifact not found in extracted package")]
    ArtifactNotFound,

    /// The requested target column does not exist in the dataset.
    #[error("Target column '{0}' not found in the dataset")]
    InvalidTargetColumn(String),

    /// A model or preprocessor artifact could not be parsed.
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    /// The dataset is malformed for the requested evaluation.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// The loaded estimator does not expose a required capability.
    #[error("Estimator does not support {0}")]
    UnsupportedCapability(&'static str),

    /// Diagnostic plot rendering failed. Non-fatal: the evaluator logs it
    /// and completes the job with a null artifact reference.
    #[error("Plot rendering failed: {0}")]
    Plot(String),

    /// The hard execution ceiling elapsed.
    #[error("Evaluation timed out after {0} seconds")]
    TimedOut(u64),

    /// A cooperative cancellation request was observed between stages.
    #[error("Evaluation cancelled")]
    Cancelled,

    /// A blocking stage panicked or was aborted.
    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}
