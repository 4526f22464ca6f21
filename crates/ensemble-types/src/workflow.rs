//! Workflow domain types for Ensemble.
//!
//! Defines the reusable pipeline definition (`WorkflowTemplate` and its
//! ordered `WorkflowPhase` list) and the execution tracking types
//! (`WorkflowExecution`, `PhaseExecution`). Templates are the declarative
//! shape; executions are one run of a template against a concrete task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::llm::ProviderConfig;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    BudgetExceeded,
    Paused,
    AwaitingApproval,
}

impl WorkflowStatus {
    /// Terminal statuses cannot transition anywhere else.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::Cancelled
                | WorkflowStatus::BudgetExceeded
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::BudgetExceeded => "budget_exceeded",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::AwaitingApproval => "awaiting_approval",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkflowStatus::Pending),
            "running" => Ok(WorkflowStatus::Running),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            "budget_exceeded" => Ok(WorkflowStatus::BudgetExceeded),
            "paused" => Ok(WorkflowStatus::Paused),
            "awaiting_approval" => Ok(WorkflowStatus::AwaitingApproval),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

/// Status of a single phase attempt within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PhaseStatus::Pending),
            "running" => Ok(PhaseStatus::Running),
            "completed" => Ok(PhaseStatus::Completed),
            "failed" => Ok(PhaseStatus::Failed),
            "skipped" => Ok(PhaseStatus::Skipped),
            other => Err(format!("invalid phase status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Policy enums
// ---------------------------------------------------------------------------

/// What kind of work a phase performs. Informational; the engine treats all
/// roles identically but surfaces them in events and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseRole {
    Analyzer,
    Planner,
    Implementer,
    ReviewerFunctional,
    ReviewerStyle,
    Verifier,
    Custom,
}

/// The origin of an execution's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    GithubIssue,
    #[default]
    ManualTask,
    DirectoryScan,
}

/// Policy governing whether a failed, iterable phase retries automatically
/// or waits for human approval first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationBehavior {
    AutoIterate,
    PauseForApproval,
}

/// Policy governing what happens when a phase fails and cannot (or should
/// not) iterate further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureBehavior {
    /// Pause the execution and ask the caller whether to continue.
    PauseNotify,
    /// Reserved. Currently falls through with no corrective action.
    FallbackProvider,
    /// Skip the failed batch and advance.
    SkipPhase,
}

// ---------------------------------------------------------------------------
// Phase definition
// ---------------------------------------------------------------------------

/// One stage of a pipeline, bound to one provider configuration and one
/// prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPhase {
    /// UUIDv7 assigned when the phase is created.
    pub id: Uuid,
    /// Display name. Also the key under which this phase's artifact is
    /// exposed to later phases via `{artifact:<name>}`.
    pub name: String,
    /// Role tag.
    pub role: PhaseRole,
    /// Which backend runs this phase and how.
    pub provider_config: ProviderConfig,
    /// Prompt template with `{task_description}`, `{project_path}` and
    /// `{artifact:<phaseName>}` placeholders.
    pub prompt_template: String,
    /// The artifact type this phase is expected to produce.
    pub output_artifact_type: crate::artifact::ArtifactType,
    /// Pattern in the streamed output marking the phase done.
    #[serde(default = "default_success_pattern")]
    pub success_pattern: String,
    /// Whether an operator may skip this phase after failure.
    #[serde(default = "default_true")]
    pub can_skip: bool,
    /// Whether a failed batch containing this phase may re-run.
    #[serde(default)]
    pub can_iterate: bool,
    /// Retry ceiling for provider-level retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-phase timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Display name of a sibling phase this one must run concurrently with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_with: Option<String>,
    /// Order index used for sequencing. Phases sharing an index and a mutual
    /// `parallel_with` relation form a parallel batch.
    pub order: u32,
}

fn default_success_pattern() -> String {
    "/complete".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    3600
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A reusable, ordered definition of phases plus iteration/failure/budget
/// policy.
///
/// Invariant (enforced by the template service, not by this type): within a
/// scope (global, or one project) at most one template has `is_default` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Ordered phase definitions.
    pub phases: Vec<WorkflowPhase>,
    /// Ceiling for `WorkflowExecution::iteration`.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_iteration_behavior")]
    pub iteration_behavior: IterationBehavior,
    #[serde(default = "default_failure_behavior")]
    pub failure_behavior: FailureBehavior,
    /// Optional spend ceiling inherited by executions of this template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_limit: Option<f64>,
    /// Whether this is the default template for its scope.
    #[serde(default)]
    pub is_default: bool,
    /// Global templates are visible to every project.
    #[serde(default = "default_true")]
    pub is_global: bool,
    /// Set when the template is bound to one project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_iteration_behavior() -> IterationBehavior {
    IterationBehavior::AutoIterate
}

fn default_failure_behavior() -> FailureBehavior {
    FailureBehavior::PauseNotify
}

// ---------------------------------------------------------------------------
// Declarative export form
// ---------------------------------------------------------------------------

/// Portable phase definition used in the YAML export format. Carries no ID;
/// import mints a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseExport {
    pub name: String,
    pub role: PhaseRole,
    pub provider_config: ProviderConfig,
    pub prompt_template: String,
    pub output_artifact_type: crate::artifact::ArtifactType,
    #[serde(default = "default_success_pattern")]
    pub success_pattern: String,
    #[serde(default = "default_true")]
    pub can_skip: bool,
    #[serde(default)]
    pub can_iterate: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_with: Option<String>,
    pub order: u32,
}

/// Portable template document for export/import.
///
/// Carries no identifiers, default flags, or timestamps; importing always
/// creates a new template. Everything else round-trips losslessly,
/// including order indexes and parallel relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateExport {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_iteration_behavior")]
    pub iteration_behavior: IterationBehavior,
    #[serde(default = "default_failure_behavior")]
    pub failure_behavior: FailureBehavior,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_limit: Option<f64>,
    pub phases: Vec<PhaseExport>,
}

impl TemplateExport {
    /// Strip a template down to its portable form.
    pub fn from_template(template: &WorkflowTemplate) -> Self {
        Self {
            name: template.name.clone(),
            description: template.description.clone(),
            max_iterations: template.max_iterations,
            iteration_behavior: template.iteration_behavior,
            failure_behavior: template.failure_behavior,
            budget_limit: template.budget_limit,
            phases: template
                .phases
                .iter()
                .map(|p| PhaseExport {
                    name: p.name.clone(),
                    role: p.role,
                    provider_config: p.provider_config.clone(),
                    prompt_template: p.prompt_template.clone(),
                    output_artifact_type: p.output_artifact_type,
                    success_pattern: p.success_pattern.clone(),
                    can_skip: p.can_skip,
                    can_iterate: p.can_iterate,
                    max_retries: p.max_retries,
                    timeout_secs: p.timeout_secs,
                    parallel_with: p.parallel_with.clone(),
                    order: p.order,
                })
                .collect(),
        }
    }

    /// Materialize a new template from the portable form, minting fresh
    /// IDs for the template and every phase.
    pub fn into_template(self, project_id: Option<i64>) -> WorkflowTemplate {
        let now = Utc::now();
        WorkflowTemplate {
            id: Uuid::now_v7(),
            name: self.name,
            description: self.description,
            phases: self
                .phases
                .into_iter()
                .map(|p| WorkflowPhase {
                    id: Uuid::now_v7(),
                    name: p.name,
                    role: p.role,
                    provider_config: p.provider_config,
                    prompt_template: p.prompt_template,
                    output_artifact_type: p.output_artifact_type,
                    success_pattern: p.success_pattern,
                    can_skip: p.can_skip,
                    can_iterate: p.can_iterate,
                    max_retries: p.max_retries,
                    timeout_secs: p.timeout_secs,
                    parallel_with: p.parallel_with,
                    order: p.order,
                })
                .collect(),
            max_iterations: self.max_iterations,
            iteration_behavior: self.iteration_behavior,
            failure_behavior: self.failure_behavior,
            budget_limit: self.budget_limit,
            is_default: false,
            is_global: project_id.is_none(),
            project_id,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One run of a template against a concrete task.
///
/// Owned exclusively by the orchestrator; mutated only through orchestrator
/// operations and persisted after every state transition so recovery can
/// reconstruct it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 execution ID.
    pub id: Uuid,
    pub template_id: Uuid,
    /// Template name, denormalized for display.
    pub template_name: String,
    pub trigger_mode: TriggerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub project_path: String,
    /// Linkage to the issue-session that produced the task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_session_id: Option<i64>,
    #[serde(default)]
    pub task_description: String,
    pub status: WorkflowStatus,
    /// The phase the cursor currently points at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase_id: Option<Uuid>,
    /// 1-based iteration counter, incremented when a failed batch re-runs.
    pub iteration: u32,
    pub total_tokens_input: u64,
    pub total_tokens_output: u64,
    pub total_cost_usd: f64,
    /// Phase attempts recorded so far, in completion order.
    #[serde(default)]
    pub phase_executions: Vec<PhaseExecution>,
    /// Artifacts produced so far.
    #[serde(default)]
    pub artifact_ids: Vec<Uuid>,
    /// Effective spend ceiling for the execution scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_limit: Option<f64>,
    /// Inherited from the template at creation time.
    pub iteration_behavior: IterationBehavior,
    #[serde(default)]
    pub interactive_mode: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Total tokens across both directions.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens_input + self.total_tokens_output
    }
}

/// One attempt at running a phase definition within an execution.
///
/// Created at phase start, finalized exactly once when the phase concludes.
/// A failed record may later be marked skipped by an explicit operator
/// action while the execution is paused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseExecution {
    /// UUIDv7 phase execution ID.
    pub id: Uuid,
    pub execution_id: Uuid,
    pub phase_id: Uuid,
    pub phase_name: String,
    pub phase_role: PhaseRole,
    pub status: PhaseStatus,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost_usd: f64,
    /// The artifact this attempt produced, if it completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_artifact_id: Option<Uuid>,
    /// Human-readable failure explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
