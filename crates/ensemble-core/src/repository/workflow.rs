//! Workflow repository trait definition.
//!
//! Covers three entity families:
//! - **Templates:** CRUD plus default-flag queries scoped by project.
//! - **Executions:** create/update/query one run of a template.
//! - **Phase executions:** the per-attempt audit records.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use ensemble_types::error::RepositoryError;
use ensemble_types::workflow::{
    PhaseExecution, PhaseStatus, WorkflowExecution, WorkflowStatus, WorkflowTemplate,
};
use uuid::Uuid;

/// Partial-update payload for an execution. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ExecutionUpdate {
    pub status: Option<WorkflowStatus>,
    pub current_phase_id: Option<Uuid>,
    pub iteration: Option<u32>,
    pub total_tokens_input: Option<u64>,
    pub total_tokens_output: Option<u64>,
    pub total_cost_usd: Option<f64>,
    pub artifact_ids: Option<Vec<Uuid>>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Repository trait for workflow persistence.
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    /// Insert a new template.
    fn create_template(
        &self,
        template: &WorkflowTemplate,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a template by ID.
    fn get_template(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowTemplate>, RepositoryError>> + Send;

    /// List templates. `project_id` filters to one project's templates;
    /// `include_global` additionally includes global ones.
    fn list_templates(
        &self,
        project_id: Option<i64>,
        include_global: bool,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowTemplate>, RepositoryError>> + Send;

    /// Get the default template for a project scope, if one is set.
    /// `project_id = None` queries the global scope.
    fn get_default_template(
        &self,
        project_id: Option<i64>,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowTemplate>, RepositoryError>> + Send;

    /// Replace a template wholesale (same ID).
    fn update_template(
        &self,
        template: &WorkflowTemplate,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a template by ID. Returns `true` if it existed.
    fn delete_template(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Create a new execution record.
    fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution by ID.
    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Partially update an execution.
    fn update_execution(
        &self,
        id: &Uuid,
        update: &ExecutionUpdate,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List executions, newest first, optionally filtered by project and
    /// status.
    fn list_executions(
        &self,
        project_id: Option<i64>,
        status: Option<WorkflowStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Phase executions
    // -----------------------------------------------------------------------

    /// Persist a finalized phase execution record.
    fn create_phase_execution(
        &self,
        phase_execution: &PhaseExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update the status of a phase execution (used by skip-phase).
    fn update_phase_execution_status(
        &self,
        id: &Uuid,
        status: PhaseStatus,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List phase executions for an execution, oldest first.
    fn list_phase_executions(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<PhaseExecution>, RepositoryError>> + Send;
}
