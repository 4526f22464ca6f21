//! Workflow orchestrator: the top-level driver.
//!
//! Creates executions from templates, advances the phase cursor (including
//! parallel batches), applies the iteration/failure policy, consults the
//! budget ledger between batches, and recovers interrupted executions at
//! startup. The execution record is owned exclusively by the orchestrator
//! and persisted after every state transition.
//!
//! A batch is the set of phases sharing an order index connected through a
//! mutual `parallel_with` name relation. Batches of size two or more run
//! concurrently in a `JoinSet`; the orchestrator waits for every member
//! regardless of individual failure, then folds the results in before the
//! next batch starts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use ensemble_types::budget::BudgetScope;
use ensemble_types::error::OrchestratorError;
use ensemble_types::event::WorkflowEvent;
use ensemble_types::workflow::{
    FailureBehavior, IterationBehavior, PhaseExecution, PhaseStatus, TriggerMode,
    WorkflowExecution, WorkflowPhase, WorkflowStatus, WorkflowTemplate,
};

use crate::artifact::ArtifactStore;
use crate::budget::{BudgetLedger, GLOBAL_SCOPE_ID};
use crate::event::{ApprovalHandler, EventBus};
use crate::provider::ProviderRegistry;
use crate::repository::workflow::ExecutionUpdate;
use crate::repository::{ArtifactRepository, BudgetRepository, WorkflowRepository};

use super::phase_runner::PhaseRunner;
use super::registry::ExecutionRegistry;
use super::template::TemplateService;

/// Parameters for creating a new execution.
#[derive(Debug, Clone, Default)]
pub struct CreateExecution {
    /// Explicit template; falls back to the scope default when absent.
    pub template_id: Option<Uuid>,
    pub trigger_mode: TriggerMode,
    pub project_id: Option<i64>,
    pub project_path: String,
    pub issue_session_id: Option<i64>,
    pub task_description: String,
    /// Overrides the template's budget limit when set.
    pub budget_limit: Option<f64>,
    pub interactive_mode: bool,
}

/// Counts reported by startup recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Executions demoted from `running` to `paused`.
    pub recovered: usize,
    /// Executions already sitting in `paused` or `awaiting_approval`.
    pub awaiting_action: usize,
}

/// Outcome of one batch, consumed by the policy step.
struct BatchOutcome {
    any_failed: bool,
    batch_len: usize,
}

/// What the policy decided to do with a failed batch.
enum PolicyDecision {
    /// Re-run the same batch.
    Retry,
    /// Advance the cursor past the batch.
    Skip,
    /// Stop the loop; status already set.
    Halt,
}

pub struct Orchestrator<W, A, B>
where
    W: WorkflowRepository + 'static,
    A: ArtifactRepository + 'static,
    B: BudgetRepository + 'static,
{
    repo: Arc<W>,
    templates: TemplateService<W>,
    artifacts: Arc<ArtifactStore<A>>,
    ledger: Arc<BudgetLedger<B>>,
    providers: Arc<ProviderRegistry>,
    bus: EventBus,
    approval: Option<Arc<dyn ApprovalHandler>>,
    cache: ExecutionRegistry,
    runner_tokens: DashMap<Uuid, CancellationToken>,
}

impl<W, A, B> Orchestrator<W, A, B>
where
    W: WorkflowRepository + 'static,
    A: ArtifactRepository + 'static,
    B: BudgetRepository + 'static,
{
    pub fn new(
        repo: Arc<W>,
        artifact_repo: Arc<A>,
        budget_repo: Arc<B>,
        providers: Arc<ProviderRegistry>,
        bus: EventBus,
    ) -> Self {
        Self {
            templates: TemplateService::new(Arc::clone(&repo)),
            repo,
            artifacts: Arc::new(ArtifactStore::new(artifact_repo)),
            ledger: Arc::new(BudgetLedger::new(budget_repo)),
            providers,
            bus,
            approval: None,
            cache: ExecutionRegistry::default(),
            runner_tokens: DashMap::new(),
        }
    }

    /// Install the yes/no decision channel. Without one, every approval
    /// request is treated as approved.
    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Some(handler);
        self
    }

    pub fn template_service(&self) -> &TemplateService<W> {
        &self.templates
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    // -----------------------------------------------------------------------
    // Creation and accessors
    // -----------------------------------------------------------------------

    /// Create a new execution in status `pending`.
    ///
    /// Resolves the template explicitly, else the default for the project
    /// scope, else the global default.
    pub async fn create_execution(
        &self,
        params: CreateExecution,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let template = match params.template_id {
            Some(id) => self.templates.get(id).await?,
            None => None,
        };
        let template = match template {
            Some(t) => t,
            None => self
                .templates
                .get_default(params.project_id)
                .await?
                .ok_or(OrchestratorError::NoTemplateFound)?,
        };

        let execution = WorkflowExecution {
            id: Uuid::now_v7(),
            template_id: template.id,
            template_name: template.name.clone(),
            trigger_mode: params.trigger_mode,
            project_id: params.project_id,
            project_path: params.project_path,
            issue_session_id: params.issue_session_id,
            task_description: params.task_description,
            status: WorkflowStatus::Pending,
            current_phase_id: None,
            iteration: 1,
            total_tokens_input: 0,
            total_tokens_output: 0,
            total_cost_usd: 0.0,
            phase_executions: vec![],
            artifact_ids: vec![],
            budget_limit: params.budget_limit.or(template.budget_limit),
            iteration_behavior: template.iteration_behavior,
            interactive_mode: params.interactive_mode,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        self.repo.create_execution(&execution).await?;

        if execution.budget_limit.is_some() {
            self.ledger
                .ensure_tracker(
                    BudgetScope::Execution,
                    &execution.id.to_string(),
                    execution.budget_limit,
                )
                .await?;
        }

        info!(
            execution_id = %execution.id,
            template = %execution.template_name,
            "created workflow execution"
        );
        self.cache.insert(execution.clone());
        Ok(execution)
    }

    pub async fn get_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<WorkflowExecution>, OrchestratorError> {
        if let Some(execution) = self.cache.get(execution_id) {
            return Ok(Some(execution));
        }
        let execution = self.repo.get_execution(&execution_id).await?;
        if let Some(execution) = &execution {
            self.cache.insert(execution.clone());
        }
        Ok(execution)
    }

    pub async fn list_executions(
        &self,
        project_id: Option<i64>,
        status: Option<WorkflowStatus>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, OrchestratorError> {
        Ok(self.repo.list_executions(project_id, status, limit).await?)
    }

    pub async fn list_artifacts(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<ensemble_types::artifact::Artifact>, OrchestratorError> {
        Ok(self.artifacts.list_by_execution(execution_id).await?)
    }

    pub fn budget_ledger(&self) -> &BudgetLedger<B> {
        &self.ledger
    }

    /// Drop the cached copy of an execution.
    ///
    /// Needed when the backing store was mutated outside the orchestrator,
    /// e.g. by an administrative tool sharing the database.
    pub fn invalidate_cache(&self, execution_id: Uuid) {
        self.cache.invalidate(execution_id);
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    /// Drive an execution until it reaches a terminal-or-paused state.
    ///
    /// A final status is always persisted and a status event always
    /// emitted, regardless of outcome; terminal outcomes also record the
    /// completion timestamp.
    pub async fn run(
        &self,
        execution_id: Uuid,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let mut execution = self
            .get_execution(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))?;

        let Some(template) = self.templates.get(execution.template_id).await? else {
            // Template vanished from under it
            error!(execution_id = %execution_id, "template missing, failing execution");
            execution.status = WorkflowStatus::Failed;
            execution.completed_at = Some(Utc::now());
            self.persist_status(&mut execution).await?;
            return Ok(execution);
        };

        execution.status = WorkflowStatus::Running;
        execution.started_at = Some(Utc::now());
        // A re-run of a previously failed attempt gets a fresh completion
        // stamp at the end
        execution.completed_at = None;
        self.repo
            .update_execution(
                &execution.id,
                &ExecutionUpdate {
                    status: Some(execution.status),
                    started_at: execution.started_at,
                    ..Default::default()
                },
            )
            .await?;
        self.cache.insert(execution.clone());
        self.bus.publish(WorkflowEvent::StatusChanged {
            execution_id: execution.id,
            status: execution.status,
        });

        let runner = Arc::new(PhaseRunner::new(
            Arc::clone(&self.providers),
            Arc::clone(&self.artifacts),
            Arc::clone(&self.ledger),
            self.bus.clone(),
        ));
        self.runner_tokens
            .insert(execution.id, runner.cancellation_token());

        let result = self.run_phases(&mut execution, &template, &runner).await;

        runner.cleanup();
        self.runner_tokens.remove(&execution.id);
        result?;

        Ok(execution)
    }

    async fn run_phases(
        &self,
        execution: &mut WorkflowExecution,
        template: &WorkflowTemplate,
        runner: &Arc<PhaseRunner<A, B>>,
    ) -> Result<(), OrchestratorError> {
        let mut phases = template.phases.clone();
        phases.sort_by_key(|p| p.order);

        // A resumed execution picks up at the first batch with any
        // unfinished phase; earlier results are rehydrated so their
        // artifacts still resolve from later prompts.
        let mut artifacts: HashMap<String, String> = HashMap::new();
        for pe in &execution.phase_executions {
            if pe.status != PhaseStatus::Completed {
                continue;
            }
            if let Some(artifact_id) = pe.output_artifact_id {
                if let Some(content) = self.artifacts.read_content(artifact_id).await? {
                    artifacts.insert(pe.phase_name.clone(), content);
                }
            }
        }

        let mut i = 0;
        while i < phases.len() {
            let batch_done = collect_batch(&phases, i).iter().all(|phase| {
                execution.phase_executions.iter().any(|pe| {
                    pe.phase_id == phase.id
                        && matches!(pe.status, PhaseStatus::Completed | PhaseStatus::Skipped)
                })
            });
            if !batch_done {
                break;
            }
            i += collect_batch(&phases, i).len();
        }

        while i < phases.len() {
            // Pick up external transitions (cancel, budget kill) persisted
            // since the last batch
            if let Some(persisted) = self.repo.get_execution(&execution.id).await? {
                execution.status = persisted.status;
                // Cancel records its own completion timestamp; keep it
                if persisted.completed_at.is_some() {
                    execution.completed_at = persisted.completed_at;
                }
            }
            if matches!(
                execution.status,
                WorkflowStatus::Cancelled | WorkflowStatus::BudgetExceeded
            ) {
                break;
            }

            let batch = collect_batch(&phases, i);
            let leader = &phases[i];

            execution.current_phase_id = Some(leader.id);
            self.repo
                .update_execution(
                    &execution.id,
                    &ExecutionUpdate {
                        current_phase_id: Some(leader.id),
                        ..Default::default()
                    },
                )
                .await?;

            let results = if batch.len() > 1 {
                self.run_parallel_batch(execution, &batch, runner, &artifacts)
                    .await
            } else {
                vec![
                    runner
                        .run_phase(execution, &batch[0], &artifacts, execution.iteration)
                        .await,
                ]
            };

            let outcome = BatchOutcome {
                any_failed: results.iter().any(|pe| pe.status == PhaseStatus::Failed),
                batch_len: batch.len(),
            };

            self.fold_batch_results(execution, results, &mut artifacts)
                .await?;

            if outcome.any_failed {
                match self
                    .apply_failure_policy(execution, template, leader, &outcome)
                    .await?
                {
                    PolicyDecision::Retry => continue,
                    PolicyDecision::Skip => {
                        i += outcome.batch_len;
                        continue;
                    }
                    PolicyDecision::Halt => break,
                }
            }

            if !self.within_all_budgets(execution).await? {
                warn!(execution_id = %execution.id, "budget exceeded, stopping execution");
                execution.status = WorkflowStatus::BudgetExceeded;
                self.set_status(execution).await?;
                break;
            }

            i += outcome.batch_len;
        }

        if execution.status == WorkflowStatus::Running {
            execution.status = WorkflowStatus::Completed;
        }
        // Cancel already stamped its own timestamp; a paused exit has no
        // completion to record
        if execution.status.is_terminal() && execution.completed_at.is_none() {
            execution.completed_at = Some(Utc::now());
        }
        self.persist_status(execution).await?;
        Ok(())
    }

    async fn run_parallel_batch(
        &self,
        execution: &WorkflowExecution,
        batch: &[WorkflowPhase],
        runner: &Arc<PhaseRunner<A, B>>,
        artifacts: &HashMap<String, String>,
    ) -> Vec<PhaseExecution> {
        info!(
            execution_id = %execution.id,
            phases = ?batch.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "running parallel batch"
        );

        let mut set = JoinSet::new();
        for phase in batch {
            let runner = Arc::clone(runner);
            let execution = execution.clone();
            let phase = phase.clone();
            let artifacts = artifacts.clone();
            let iteration = execution.iteration;
            set.spawn(async move {
                runner
                    .run_phase(&execution, &phase, &artifacts, iteration)
                    .await
            });
        }

        // All-complete join; a failed member never cancels its siblings
        let mut results = Vec::with_capacity(batch.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pe) => results.push(pe),
                Err(e) => error!(execution_id = %execution.id, error = %e, "phase task panicked"),
            }
        }
        results
    }

    /// Append results, accumulate totals, register artifacts, persist.
    async fn fold_batch_results(
        &self,
        execution: &mut WorkflowExecution,
        results: Vec<PhaseExecution>,
        artifacts: &mut HashMap<String, String>,
    ) -> Result<(), OrchestratorError> {
        for pe in results {
            execution.total_tokens_input += pe.tokens_input;
            execution.total_tokens_output += pe.tokens_output;
            execution.total_cost_usd += pe.cost_usd;

            if let Some(artifact_id) = pe.output_artifact_id {
                if let Some(content) = self.artifacts.read_content(artifact_id).await? {
                    artifacts.insert(pe.phase_name.clone(), content);
                }
                execution.artifact_ids.push(artifact_id);
            }

            self.repo.create_phase_execution(&pe).await?;
            execution.phase_executions.push(pe);
        }

        self.repo
            .update_execution(
                &execution.id,
                &ExecutionUpdate {
                    total_tokens_input: Some(execution.total_tokens_input),
                    total_tokens_output: Some(execution.total_tokens_output),
                    total_cost_usd: Some(execution.total_cost_usd),
                    artifact_ids: Some(execution.artifact_ids.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.cache.insert(execution.clone());
        Ok(())
    }

    /// Decide what a failed batch means for the execution.
    async fn apply_failure_policy(
        &self,
        execution: &mut WorkflowExecution,
        template: &WorkflowTemplate,
        leader: &WorkflowPhase,
        outcome: &BatchOutcome,
    ) -> Result<PolicyDecision, OrchestratorError> {
        let can_iterate = leader.can_iterate && execution.iteration < template.max_iterations;

        if can_iterate {
            if execution.iteration_behavior == IterationBehavior::PauseForApproval {
                execution.status = WorkflowStatus::AwaitingApproval;
                self.set_status(execution).await?;

                let approved = self
                    .request_approval(
                        execution.id,
                        format!(
                            "Phase '{}' failed. Retry iteration {}?",
                            leader.name,
                            execution.iteration + 1
                        ),
                    )
                    .await;

                if !approved {
                    if template.failure_behavior == FailureBehavior::SkipPhase {
                        execution.status = WorkflowStatus::Running;
                        self.set_status(execution).await?;
                        return Ok(PolicyDecision::Skip);
                    }
                    execution.status = WorkflowStatus::Failed;
                    return Ok(PolicyDecision::Halt);
                }

                execution.status = WorkflowStatus::Running;
                self.set_status(execution).await?;
            }

            execution.iteration += 1;
            self.repo
                .update_execution(
                    &execution.id,
                    &ExecutionUpdate {
                        iteration: Some(execution.iteration),
                        ..Default::default()
                    },
                )
                .await?;
            self.cache.insert(execution.clone());
            info!(
                execution_id = %execution.id,
                iteration = execution.iteration,
                phase = %leader.name,
                "re-running failed batch"
            );
            return Ok(PolicyDecision::Retry);
        }

        match template.failure_behavior {
            FailureBehavior::SkipPhase => {
                info!(
                    execution_id = %execution.id,
                    phase = %leader.name,
                    batch = outcome.batch_len,
                    "skipping failed batch"
                );
                Ok(PolicyDecision::Skip)
            }
            // Reserved policy, no corrective action
            FailureBehavior::FallbackProvider => Ok(PolicyDecision::Skip),
            FailureBehavior::PauseNotify => {
                execution.status = WorkflowStatus::Paused;
                self.set_status(execution).await?;

                let message = format!(
                    "Phase '{}' failed after {} iterations. Retry?",
                    leader.name, execution.iteration
                );
                self.bus.publish(WorkflowEvent::ApprovalRequested {
                    execution_id: execution.id,
                    message: message.clone(),
                });

                // No handler means nobody can answer; stay paused until an
                // operator resumes or skips the phase
                let Some(handler) = &self.approval else {
                    warn!(
                        execution_id = %execution.id,
                        phase = %leader.name,
                        "phase failed with no approval handler, leaving execution paused"
                    );
                    return Ok(PolicyDecision::Halt);
                };

                if !handler.request(execution.id, message).await {
                    execution.status = WorkflowStatus::Failed;
                    return Ok(PolicyDecision::Halt);
                }

                // Approved: retry the batch without touching the iteration
                // counter
                execution.status = WorkflowStatus::Running;
                self.set_status(execution).await?;
                Ok(PolicyDecision::Retry)
            }
        }
    }

    async fn request_approval(&self, execution_id: Uuid, message: String) -> bool {
        self.bus.publish(WorkflowEvent::ApprovalRequested {
            execution_id,
            message: message.clone(),
        });
        match &self.approval {
            Some(handler) => handler.request(execution_id, message).await,
            None => true,
        }
    }

    /// Logical AND of the execution, project, and global scope checks.
    async fn within_all_budgets(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<bool, OrchestratorError> {
        let (ok, _) = self
            .ledger
            .check_budget(BudgetScope::Execution, &execution.id.to_string(), 0.0)
            .await?;
        if !ok {
            return Ok(false);
        }
        if let Some(project_id) = execution.project_id {
            let (ok, _) = self
                .ledger
                .check_budget(BudgetScope::Project, &project_id.to_string(), 0.0)
                .await?;
            if !ok {
                return Ok(false);
            }
        }
        let (ok, _) = self
            .ledger
            .check_budget(BudgetScope::Global, GLOBAL_SCOPE_ID, 0.0)
            .await?;
        Ok(ok)
    }

    /// Persist only the status field and emit a status event.
    async fn set_status(
        &self,
        execution: &mut WorkflowExecution,
    ) -> Result<(), OrchestratorError> {
        self.repo
            .update_execution(
                &execution.id,
                &ExecutionUpdate {
                    status: Some(execution.status),
                    ..Default::default()
                },
            )
            .await?;
        self.cache.insert(execution.clone());
        self.bus.publish(WorkflowEvent::StatusChanged {
            execution_id: execution.id,
            status: execution.status,
        });
        Ok(())
    }

    /// Persist final status plus completion timestamp and emit.
    async fn persist_status(
        &self,
        execution: &mut WorkflowExecution,
    ) -> Result<(), OrchestratorError> {
        self.repo
            .update_execution(
                &execution.id,
                &ExecutionUpdate {
                    status: Some(execution.status),
                    completed_at: execution.completed_at,
                    ..Default::default()
                },
            )
            .await?;
        self.cache.insert(execution.clone());
        self.bus.publish(WorkflowEvent::StatusChanged {
            execution_id: execution.id,
            status: execution.status,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // External transitions
    // -----------------------------------------------------------------------

    /// Cancel a non-terminal execution and release its runner.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<(), OrchestratorError> {
        let mut execution = self
            .get_execution(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))?;

        if execution.status.is_terminal() {
            return Err(OrchestratorError::IllegalStatus {
                operation: "cancel".to_string(),
                status: execution.status.to_string(),
            });
        }

        execution.status = WorkflowStatus::Cancelled;
        execution.completed_at = Some(Utc::now());
        self.persist_status(&mut execution).await?;

        if let Some((_, token)) = self.runner_tokens.remove(&execution_id) {
            token.cancel();
        }
        info!(execution_id = %execution_id, "cancelled workflow execution");
        Ok(())
    }

    /// Resume a paused or approval-waiting execution by re-invoking `run`.
    pub async fn resume(
        &self,
        execution_id: Uuid,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let execution = self
            .get_execution(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))?;

        if !matches!(
            execution.status,
            WorkflowStatus::Paused | WorkflowStatus::AwaitingApproval
        ) {
            return Err(OrchestratorError::IllegalStatus {
                operation: "resume".to_string(),
                status: execution.status.to_string(),
            });
        }

        self.run(execution_id).await
    }

    /// Mark a failed phase execution as skipped while the execution is
    /// paused. Does not by itself resume the loop.
    pub async fn skip_phase(
        &self,
        execution_id: Uuid,
        phase_id: Uuid,
    ) -> Result<(), OrchestratorError> {
        let execution = self
            .get_execution(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))?;

        if execution.status != WorkflowStatus::Paused {
            return Err(OrchestratorError::IllegalStatus {
                operation: "skip_phase".to_string(),
                status: execution.status.to_string(),
            });
        }

        let target = execution
            .phase_executions
            .iter()
            .find(|pe| pe.phase_id == phase_id && pe.status == PhaseStatus::Failed)
            .ok_or(OrchestratorError::PhaseNotSkippable(phase_id))?;

        self.repo
            .update_phase_execution_status(&target.id, PhaseStatus::Skipped)
            .await?;
        self.cache.invalidate(execution_id);
        info!(execution_id = %execution_id, phase_id = %phase_id, "marked phase skipped");
        Ok(())
    }

    /// Demote every `running` execution to `paused` at process startup.
    ///
    /// Never auto-resumes: an in-flight provider call may have produced an
    /// unrecorded side effect, so the operator decides what happens next.
    pub async fn recover_interrupted_executions(
        &self,
    ) -> Result<RecoveryReport, OrchestratorError> {
        let running = self
            .repo
            .list_executions(None, Some(WorkflowStatus::Running), u32::MAX)
            .await?;
        let paused = self
            .repo
            .list_executions(None, Some(WorkflowStatus::Paused), u32::MAX)
            .await?;
        let awaiting = self
            .repo
            .list_executions(None, Some(WorkflowStatus::AwaitingApproval), u32::MAX)
            .await?;

        let mut recovered = 0;
        for execution in running {
            warn!(
                execution_id = %execution.id,
                "execution was running at shutdown, demoting to paused"
            );
            self.repo
                .update_execution(
                    &execution.id,
                    &ExecutionUpdate {
                        status: Some(WorkflowStatus::Paused),
                        ..Default::default()
                    },
                )
                .await?;
            self.cache.invalidate(execution.id);
            recovered += 1;
        }

        let report = RecoveryReport {
            recovered,
            awaiting_action: paused.len() + awaiting.len(),
        };
        if report.recovered > 0 || report.awaiting_action > 0 {
            info!(
                recovered = report.recovered,
                awaiting_action = report.awaiting_action,
                "workflow recovery complete"
            );
        }
        Ok(report)
    }
}

/// The phases at `start`'s order index linked to the batch leader through a
/// `parallel_with` reference in either direction; a one-sided declaration
/// is enough.
///
/// Supports n-way groups; when several phases share a name, the relation
/// matches each of them (first-by-order wins nothing special, all join the
/// batch).
fn collect_batch(phases: &[WorkflowPhase], start: usize) -> Vec<WorkflowPhase> {
    let leader = &phases[start];
    let mut batch = vec![leader.clone()];

    for phase in &phases[start + 1..] {
        if phase.order != leader.order {
            break;
        }
        let linked = leader.parallel_with.as_deref() == Some(phase.name.as_str())
            || phase.parallel_with.as_deref() == Some(leader.name.as_str());
        if linked {
            batch.push(phase.clone());
        }
    }
    batch
}
