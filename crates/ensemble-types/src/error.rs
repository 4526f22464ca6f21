use thiserror::Error;

/// Errors from repository operations (used by trait definitions in
/// ensemble-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from template registry operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found")]
    NotFound,

    #[error("invalid template: {0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Caller-facing validation errors from orchestrator operations.
///
/// These are rejected synchronously at the point of the call. In-pipeline
/// failures (provider errors, timeouts) are never represented here; they
/// become failed phase executions instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no workflow template found")]
    NoTemplateFound,

    #[error("workflow execution not found: {0}")]
    ExecutionNotFound(uuid::Uuid),

    #[error("operation illegal in status '{status}': {operation}")]
    IllegalStatus { operation: String, status: String },

    #[error("phase execution not found or not failed: {0}")]
    PhaseNotSkippable(uuid::Uuid),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),
}
