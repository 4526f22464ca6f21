//! In-memory repository implementations.
//!
//! Backed by `DashMap`, no persistence across restarts. Used throughout the
//! test suites and suitable for ephemeral embedded use; durable deployments
//! use the SQLite implementations in ensemble-infra.

use dashmap::DashMap;
use uuid::Uuid;

use ensemble_types::artifact::{Artifact, ArtifactContent};
use ensemble_types::budget::{BudgetScope, BudgetTracker};
use ensemble_types::error::RepositoryError;
use ensemble_types::workflow::{
    PhaseExecution, PhaseStatus, WorkflowExecution, WorkflowStatus, WorkflowTemplate,
};

use super::workflow::ExecutionUpdate;
use super::{ArtifactRepository, BudgetRepository, WorkflowRepository};

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryWorkflowRepo {
    templates: DashMap<Uuid, WorkflowTemplate>,
    executions: DashMap<Uuid, WorkflowExecution>,
    phase_executions: DashMap<Uuid, PhaseExecution>,
}

impl WorkflowRepository for MemoryWorkflowRepo {
    async fn create_template(&self, template: &WorkflowTemplate) -> Result<(), RepositoryError> {
        self.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn get_template(&self, id: &Uuid) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        Ok(self.templates.get(id).map(|t| t.clone()))
    }

    async fn list_templates(
        &self,
        project_id: Option<i64>,
        include_global: bool,
    ) -> Result<Vec<WorkflowTemplate>, RepositoryError> {
        let mut out: Vec<WorkflowTemplate> = self
            .templates
            .iter()
            .filter(|t| match project_id {
                Some(pid) => t.project_id == Some(pid) || (include_global && t.is_global),
                None => include_global || !t.is_global,
            })
            .map(|t| t.clone())
            .collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }

    async fn get_default_template(
        &self,
        project_id: Option<i64>,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        Ok(self
            .templates
            .iter()
            .find(|t| {
                t.is_default
                    && match project_id {
                        Some(pid) => t.project_id == Some(pid),
                        None => t.is_global,
                    }
            })
            .map(|t| t.clone()))
    }

    async fn update_template(&self, template: &WorkflowTemplate) -> Result<(), RepositoryError> {
        if !self.templates.contains_key(&template.id) {
            return Err(RepositoryError::NotFound);
        }
        self.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn delete_template(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.templates.remove(id).is_some())
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let Some(mut execution) = self.executions.get(id).map(|e| e.clone()) else {
            return Ok(None);
        };
        execution.phase_executions = self.list_phase_executions(id).await?;
        Ok(Some(execution))
    }

    async fn update_execution(
        &self,
        id: &Uuid,
        update: &ExecutionUpdate,
    ) -> Result<(), RepositoryError> {
        let mut execution = self.executions.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if let Some(status) = update.status {
            execution.status = status;
        }
        if let Some(current_phase_id) = update.current_phase_id {
            execution.current_phase_id = Some(current_phase_id);
        }
        if let Some(iteration) = update.iteration {
            execution.iteration = iteration;
        }
        if let Some(total_tokens_input) = update.total_tokens_input {
            execution.total_tokens_input = total_tokens_input;
        }
        if let Some(total_tokens_output) = update.total_tokens_output {
            execution.total_tokens_output = total_tokens_output;
        }
        if let Some(total_cost_usd) = update.total_cost_usd {
            execution.total_cost_usd = total_cost_usd;
        }
        if let Some(artifact_ids) = &update.artifact_ids {
            execution.artifact_ids = artifact_ids.clone();
        }
        if let Some(started_at) = update.started_at {
            execution.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            execution.completed_at = Some(completed_at);
        }
        Ok(())
    }

    async fn list_executions(
        &self,
        project_id: Option<i64>,
        status: Option<WorkflowStatus>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut out: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|e| project_id.is_none_or(|pid| e.project_id == Some(pid)))
            .filter(|e| status.is_none_or(|s| e.status == s))
            .map(|e| e.clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn create_phase_execution(
        &self,
        phase_execution: &PhaseExecution,
    ) -> Result<(), RepositoryError> {
        self.phase_executions
            .insert(phase_execution.id, phase_execution.clone());
        Ok(())
    }

    async fn update_phase_execution_status(
        &self,
        id: &Uuid,
        status: PhaseStatus,
    ) -> Result<(), RepositoryError> {
        let mut pe = self
            .phase_executions
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        pe.status = status;
        Ok(())
    }

    async fn list_phase_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<PhaseExecution>, RepositoryError> {
        let mut out: Vec<PhaseExecution> = self
            .phase_executions
            .iter()
            .filter(|pe| pe.execution_id == *execution_id)
            .map(|pe| pe.clone())
            .collect();
        out.sort_by_key(|pe| pe.id);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBudgetRepo {
    rows: DashMap<(BudgetScope, String), BudgetTracker>,
}

impl BudgetRepository for MemoryBudgetRepo {
    async fn create_tracker(&self, tracker: &BudgetTracker) -> Result<(), RepositoryError> {
        self.rows
            .insert((tracker.scope, tracker.scope_id.clone()), tracker.clone());
        Ok(())
    }

    async fn get_tracker(
        &self,
        scope: BudgetScope,
        scope_id: &str,
    ) -> Result<Option<BudgetTracker>, RepositoryError> {
        Ok(self
            .rows
            .get(&(scope, scope_id.to_string()))
            .map(|row| row.clone()))
    }

    async fn increment(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        cost: f64,
        tokens_input: u64,
        tokens_output: u64,
    ) -> Result<(), RepositoryError> {
        let mut row = self
            .rows
            .get_mut(&(scope, scope_id.to_string()))
            .ok_or(RepositoryError::NotFound)?;
        row.total_spent += cost;
        row.token_count_input += tokens_input;
        row.token_count_output += tokens_output;
        Ok(())
    }

    async fn set_limit(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        limit: Option<f64>,
    ) -> Result<(), RepositoryError> {
        let mut row = self
            .rows
            .get_mut(&(scope, scope_id.to_string()))
            .ok_or(RepositoryError::NotFound)?;
        row.budget_limit = limit;
        Ok(())
    }

    async fn reset(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        period_start: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), RepositoryError> {
        let mut row = self
            .rows
            .get_mut(&(scope, scope_id.to_string()))
            .ok_or(RepositoryError::NotFound)?;
        row.total_spent = 0.0;
        row.token_count_input = 0;
        row.token_count_output = 0;
        row.period_start = period_start;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryArtifactRepo {
    rows: DashMap<Uuid, Artifact>,
}

impl ArtifactRepository for MemoryArtifactRepo {
    async fn create_artifact(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        self.rows.insert(artifact.id, artifact.clone());
        Ok(())
    }

    async fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>, RepositoryError> {
        Ok(self.rows.get(&id).map(|row| row.clone()))
    }

    async fn update_content(
        &self,
        id: Uuid,
        content: &ArtifactContent,
    ) -> Result<(), RepositoryError> {
        let mut row = self.rows.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        row.content = content.clone();
        Ok(())
    }

    async fn list_by_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<Artifact>, RepositoryError> {
        let mut out: Vec<Artifact> = self
            .rows
            .iter()
            .filter(|row| row.execution_id == execution_id)
            .map(|row| row.clone())
            .collect();
        out.sort_by_key(|a| a.id);
        Ok(out)
    }
}
