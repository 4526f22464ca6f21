//! SQLite workflow repository implementation.
//!
//! Templates are stored as JSON blobs with the scope/default flags mirrored
//! into indexed columns. Executions and phase executions are columnar so
//! the recovery scan and list queries stay cheap. `get_execution` attaches
//! the execution's phase records; list queries return bare execution rows.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use ensemble_core::repository::workflow::{ExecutionUpdate, WorkflowRepository};
use ensemble_types::error::RepositoryError;
use ensemble_types::workflow::{
    PhaseExecution, PhaseStatus, WorkflowExecution, WorkflowStatus, WorkflowTemplate,
};

use super::pool::DatabasePool;
use super::{enum_from_str, enum_to_str, format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn load_phase_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<PhaseExecution>, RepositoryError> {
        // UUIDv7 ids sort by creation time
        let rows = sqlx::query("SELECT * FROM phase_executions WHERE execution_id = ? ORDER BY id ASC")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut phase_executions = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = PhaseExecutionRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            phase_executions.push(r.into_phase_execution()?);
        }
        Ok(phase_executions)
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct TemplateRow {
    template: String,
}

impl TemplateRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            template: row.try_get("template")?,
        })
    }

    fn into_template(self) -> Result<WorkflowTemplate, RepositoryError> {
        serde_json::from_str(&self.template)
            .map_err(|e| RepositoryError::Query(format!("invalid template JSON: {e}")))
    }
}

struct ExecutionRow {
    id: String,
    template_id: String,
    template_name: String,
    trigger_mode: String,
    project_id: Option<i64>,
    project_path: String,
    issue_session_id: Option<i64>,
    task_description: String,
    status: String,
    current_phase_id: Option<String>,
    iteration: i64,
    total_tokens_input: i64,
    total_tokens_output: i64,
    total_cost_usd: f64,
    artifact_ids: String,
    budget_limit: Option<f64>,
    iteration_behavior: String,
    interactive_mode: bool,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            template_id: row.try_get("template_id")?,
            template_name: row.try_get("template_name")?,
            trigger_mode: row.try_get("trigger_mode")?,
            project_id: row.try_get("project_id")?,
            project_path: row.try_get("project_path")?,
            issue_session_id: row.try_get("issue_session_id")?,
            task_description: row.try_get("task_description")?,
            status: row.try_get("status")?,
            current_phase_id: row.try_get("current_phase_id")?,
            iteration: row.try_get("iteration")?,
            total_tokens_input: row.try_get("total_tokens_input")?,
            total_tokens_output: row.try_get("total_tokens_output")?,
            total_cost_usd: row.try_get("total_cost_usd")?,
            artifact_ids: row.try_get("artifact_ids")?,
            budget_limit: row.try_get("budget_limit")?,
            iteration_behavior: row.try_get("iteration_behavior")?,
            interactive_mode: row.try_get("interactive_mode")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_execution(self) -> Result<WorkflowExecution, RepositoryError> {
        let artifact_ids: Vec<String> = serde_json::from_str(&self.artifact_ids)
            .map_err(|e| RepositoryError::Query(format!("invalid artifact_ids JSON: {e}")))?;
        let artifact_ids = artifact_ids
            .iter()
            .map(|s| parse_uuid(s))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(WorkflowExecution {
            id: parse_uuid(&self.id)?,
            template_id: parse_uuid(&self.template_id)?,
            template_name: self.template_name,
            trigger_mode: enum_from_str(&self.trigger_mode, "trigger mode")?,
            project_id: self.project_id,
            project_path: self.project_path,
            issue_session_id: self.issue_session_id,
            task_description: self.task_description,
            status: enum_from_str(&self.status, "execution status")?,
            current_phase_id: self
                .current_phase_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            iteration: self.iteration as u32,
            total_tokens_input: self.total_tokens_input as u64,
            total_tokens_output: self.total_tokens_output as u64,
            total_cost_usd: self.total_cost_usd,
            phase_executions: vec![],
            artifact_ids,
            budget_limit: self.budget_limit,
            iteration_behavior: enum_from_str(&self.iteration_behavior, "iteration behavior")?,
            interactive_mode: self.interactive_mode,
            created_at: parse_datetime(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

struct PhaseExecutionRow {
    id: String,
    execution_id: String,
    phase_id: String,
    phase_name: String,
    phase_role: String,
    status: String,
    tokens_input: i64,
    tokens_output: i64,
    cost_usd: f64,
    output_artifact_id: Option<String>,
    error: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl PhaseExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            phase_id: row.try_get("phase_id")?,
            phase_name: row.try_get("phase_name")?,
            phase_role: row.try_get("phase_role")?,
            status: row.try_get("status")?,
            tokens_input: row.try_get("tokens_input")?,
            tokens_output: row.try_get("tokens_output")?,
            cost_usd: row.try_get("cost_usd")?,
            output_artifact_id: row.try_get("output_artifact_id")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_phase_execution(self) -> Result<PhaseExecution, RepositoryError> {
        Ok(PhaseExecution {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            phase_id: parse_uuid(&self.phase_id)?,
            phase_name: self.phase_name,
            phase_role: enum_from_str(&self.phase_role, "phase role")?,
            status: enum_from_str(&self.status, "phase status")?,
            tokens_input: self.tokens_input as u64,
            tokens_output: self.tokens_output as u64,
            cost_usd: self.cost_usd,
            output_artifact_id: self
                .output_artifact_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            error: self.error,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create_template(&self, template: &WorkflowTemplate) -> Result<(), RepositoryError> {
        let template_json = serde_json::to_string(template)
            .map_err(|e| RepositoryError::Query(format!("serialize template: {e}")))?;

        sqlx::query(
            r#"INSERT INTO workflow_templates
               (id, name, is_default, is_global, project_id, template, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(template.id.to_string())
        .bind(&template.name)
        .bind(template.is_default)
        .bind(template.is_global)
        .bind(template.project_id)
        .bind(&template_json)
        .bind(format_datetime(&template.created_at))
        .bind(format_datetime(&template.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_template(&self, id: &Uuid) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        let row = sqlx::query("SELECT template FROM workflow_templates WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = TemplateRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_template()?))
            }
            None => Ok(None),
        }
    }

    async fn list_templates(
        &self,
        project_id: Option<i64>,
        include_global: bool,
    ) -> Result<Vec<WorkflowTemplate>, RepositoryError> {
        let rows = match project_id {
            Some(pid) => {
                if include_global {
                    sqlx::query(
                        "SELECT template FROM workflow_templates WHERE project_id = ? OR is_global = 1 ORDER BY name ASC",
                    )
                    .bind(pid)
                    .fetch_all(&self.pool.reader)
                    .await
                } else {
                    sqlx::query(
                        "SELECT template FROM workflow_templates WHERE project_id = ? ORDER BY name ASC",
                    )
                    .bind(pid)
                    .fetch_all(&self.pool.reader)
                    .await
                }
            }
            None => {
                if include_global {
                    sqlx::query("SELECT template FROM workflow_templates ORDER BY name ASC")
                        .fetch_all(&self.pool.reader)
                        .await
                } else {
                    sqlx::query(
                        "SELECT template FROM workflow_templates WHERE is_global = 0 ORDER BY name ASC",
                    )
                    .fetch_all(&self.pool.reader)
                    .await
                }
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut templates = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = TemplateRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            templates.push(r.into_template()?);
        }
        Ok(templates)
    }

    async fn get_default_template(
        &self,
        project_id: Option<i64>,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        let row = match project_id {
            Some(pid) => {
                sqlx::query(
                    "SELECT template FROM workflow_templates WHERE is_default = 1 AND project_id = ?",
                )
                .bind(pid)
                .fetch_optional(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT template FROM workflow_templates WHERE is_default = 1 AND is_global = 1",
                )
                .fetch_optional(&self.pool.reader)
                .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = TemplateRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_template()?))
            }
            None => Ok(None),
        }
    }

    async fn update_template(&self, template: &WorkflowTemplate) -> Result<(), RepositoryError> {
        let template_json = serde_json::to_string(template)
            .map_err(|e| RepositoryError::Query(format!("serialize template: {e}")))?;

        let result = sqlx::query(
            r#"UPDATE workflow_templates
               SET name = ?, is_default = ?, is_global = ?, project_id = ?, template = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&template.name)
        .bind(template.is_default)
        .bind(template.is_global)
        .bind(template.project_id)
        .bind(&template_json)
        .bind(format_datetime(&template.updated_at))
        .bind(template.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_template(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_templates WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let artifact_ids = serde_json::to_string(
            &execution
                .artifact_ids
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>(),
        )
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, template_id, template_name, trigger_mode, project_id, project_path,
                issue_session_id, task_description, status, current_phase_id, iteration,
                total_tokens_input, total_tokens_output, total_cost_usd, artifact_ids,
                budget_limit, iteration_behavior, interactive_mode, created_at, started_at,
                completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.template_id.to_string())
        .bind(&execution.template_name)
        .bind(enum_to_str(&execution.trigger_mode)?)
        .bind(execution.project_id)
        .bind(&execution.project_path)
        .bind(execution.issue_session_id)
        .bind(&execution.task_description)
        .bind(enum_to_str(&execution.status)?)
        .bind(execution.current_phase_id.map(|id| id.to_string()))
        .bind(execution.iteration as i64)
        .bind(execution.total_tokens_input as i64)
        .bind(execution.total_tokens_output as i64)
        .bind(execution.total_cost_usd)
        .bind(&artifact_ids)
        .bind(execution.budget_limit)
        .bind(enum_to_str(&execution.iteration_behavior)?)
        .bind(execution.interactive_mode)
        .bind(format_datetime(&execution.created_at))
        .bind(execution.started_at.as_ref().map(format_datetime))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_execution(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let mut execution = r.into_execution()?;
                execution.phase_executions = self.load_phase_executions(id).await?;
                Ok(Some(execution))
            }
            None => Ok(None),
        }
    }

    async fn update_execution(
        &self,
        id: &Uuid,
        update: &ExecutionUpdate,
    ) -> Result<(), RepositoryError> {
        // COALESCE merges: unset fields bind NULL and keep the stored value.
        // The protocol never clears a field back to NULL.
        let artifact_ids = update
            .artifact_ids
            .as_ref()
            .map(|ids| {
                serde_json::to_string(&ids.iter().map(Uuid::to_string).collect::<Vec<_>>())
            })
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let status = update.status.as_ref().map(enum_to_str).transpose()?;

        let result = sqlx::query(
            r#"UPDATE workflow_executions SET
                 status = COALESCE(?, status),
                 current_phase_id = COALESCE(?, current_phase_id),
                 iteration = COALESCE(?, iteration),
                 total_tokens_input = COALESCE(?, total_tokens_input),
                 total_tokens_output = COALESCE(?, total_tokens_output),
                 total_cost_usd = COALESCE(?, total_cost_usd),
                 artifact_ids = COALESCE(?, artifact_ids),
                 started_at = COALESCE(?, started_at),
                 completed_at = COALESCE(?, completed_at)
               WHERE id = ?"#,
        )
        .bind(status)
        .bind(update.current_phase_id.map(|p| p.to_string()))
        .bind(update.iteration.map(|i| i as i64))
        .bind(update.total_tokens_input.map(|t| t as i64))
        .bind(update.total_tokens_output.map(|t| t as i64))
        .bind(update.total_cost_usd)
        .bind(artifact_ids)
        .bind(update.started_at.as_ref().map(format_datetime))
        .bind(update.completed_at.as_ref().map(format_datetime))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_executions(
        &self,
        project_id: Option<i64>,
        status: Option<WorkflowStatus>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let status = status.as_ref().map(enum_to_str).transpose()?;

        let rows = sqlx::query(
            r#"SELECT * FROM workflow_executions
               WHERE (? IS NULL OR project_id = ?)
                 AND (? IS NULL OR status = ?)
               ORDER BY created_at DESC
               LIMIT ?"#,
        )
        .bind(project_id)
        .bind(project_id)
        .bind(&status)
        .bind(&status)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ExecutionRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            executions.push(r.into_execution()?);
        }
        Ok(executions)
    }

    async fn create_phase_execution(
        &self,
        phase_execution: &PhaseExecution,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO phase_executions
               (id, execution_id, phase_id, phase_name, phase_role, status, tokens_input,
                tokens_output, cost_usd, output_artifact_id, error, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(phase_execution.id.to_string())
        .bind(phase_execution.execution_id.to_string())
        .bind(phase_execution.phase_id.to_string())
        .bind(&phase_execution.phase_name)
        .bind(enum_to_str(&phase_execution.phase_role)?)
        .bind(enum_to_str(&phase_execution.status)?)
        .bind(phase_execution.tokens_input as i64)
        .bind(phase_execution.tokens_output as i64)
        .bind(phase_execution.cost_usd)
        .bind(phase_execution.output_artifact_id.map(|id| id.to_string()))
        .bind(&phase_execution.error)
        .bind(phase_execution.started_at.as_ref().map(format_datetime))
        .bind(phase_execution.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_phase_execution_status(
        &self,
        id: &Uuid,
        status: PhaseStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE phase_executions SET status = ? WHERE id = ?")
            .bind(enum_to_str(&status)?)
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_phase_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<PhaseExecution>, RepositoryError> {
        self.load_phase_executions(execution_id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
