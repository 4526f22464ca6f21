//! Template registry service.
//!
//! CRUD over workflow templates plus the default-template invariant: within
//! a scope (global, or one project) at most one template is the default, and
//! setting a new default clears the previous one. `duplicate`, `export`, and
//! `import` never mutate an existing template; they always mint new IDs.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use ensemble_types::artifact::ArtifactType;
use ensemble_types::error::TemplateError;
use ensemble_types::llm::{ProviderConfig, ProviderType};
use ensemble_types::workflow::{
    FailureBehavior, IterationBehavior, PhaseRole, TemplateExport, WorkflowPhase, WorkflowTemplate,
};

use crate::repository::WorkflowRepository;

pub struct TemplateService<W: WorkflowRepository> {
    repo: Arc<W>,
}

impl<W: WorkflowRepository> TemplateService<W> {
    pub fn new(repo: Arc<W>) -> Self {
        Self { repo }
    }

    /// Persist a new template.
    pub async fn create(&self, template: WorkflowTemplate) -> Result<Uuid, TemplateError> {
        if template.name.trim().is_empty() {
            return Err(TemplateError::Invalid("template name is empty".to_string()));
        }
        self.repo.create_template(&template).await?;
        Ok(template.id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<WorkflowTemplate>, TemplateError> {
        Ok(self.repo.get_template(&id).await?)
    }

    pub async fn list(
        &self,
        project_id: Option<i64>,
        include_global: bool,
    ) -> Result<Vec<WorkflowTemplate>, TemplateError> {
        Ok(self.repo.list_templates(project_id, include_global).await?)
    }

    /// Resolve the default template: a project-scoped default wins over the
    /// global one.
    pub async fn get_default(
        &self,
        project_id: Option<i64>,
    ) -> Result<Option<WorkflowTemplate>, TemplateError> {
        if project_id.is_some() {
            if let Some(template) = self.repo.get_default_template(project_id).await? {
                return Ok(Some(template));
            }
        }
        Ok(self.repo.get_default_template(None).await?)
    }

    /// Replace a template wholesale, bumping its `updated_at`.
    pub async fn update(&self, mut template: WorkflowTemplate) -> Result<(), TemplateError> {
        template.updated_at = Utc::now();
        self.repo.update_template(&template).await?;
        Ok(())
    }

    /// Delete a template. Returns `true` if it existed.
    pub async fn delete(&self, id: Uuid) -> Result<bool, TemplateError> {
        Ok(self.repo.delete_template(&id).await?)
    }

    /// Mark a template as the default for a scope, clearing any other
    /// default in that same scope first.
    pub async fn set_default(
        &self,
        id: Uuid,
        project_id: Option<i64>,
    ) -> Result<(), TemplateError> {
        let Some(mut template) = self.repo.get_template(&id).await? else {
            return Err(TemplateError::NotFound);
        };

        let scope_templates = match project_id {
            Some(pid) => self.repo.list_templates(Some(pid), false).await?,
            None => self
                .repo
                .list_templates(None, true)
                .await?
                .into_iter()
                .filter(|t| t.is_global)
                .collect(),
        };
        for mut other in scope_templates {
            if other.is_default && other.id != id {
                other.is_default = false;
                other.updated_at = Utc::now();
                self.repo.update_template(&other).await?;
            }
        }

        template.is_default = true;
        template.updated_at = Utc::now();
        self.repo.update_template(&template).await?;
        Ok(())
    }

    /// Copy a template under a new ID, with every phase re-keyed.
    ///
    /// The copy is never a default. Passing a `project_id` binds the copy to
    /// that project; otherwise it is global.
    pub async fn duplicate(
        &self,
        id: Uuid,
        new_name: Option<String>,
        project_id: Option<i64>,
    ) -> Result<Uuid, TemplateError> {
        let Some(source) = self.repo.get_template(&id).await? else {
            return Err(TemplateError::NotFound);
        };

        let name = new_name.unwrap_or_else(|| format!("{} (Copy)", source.name));
        let mut copy = TemplateExport::from_template(&source).into_template(project_id);
        copy.name = name;
        let copy_id = copy.id;
        self.repo.create_template(&copy).await?;
        Ok(copy_id)
    }

    /// Export a template to its portable YAML form.
    pub async fn export(&self, id: Uuid) -> Result<String, TemplateError> {
        let Some(template) = self.repo.get_template(&id).await? else {
            return Err(TemplateError::NotFound);
        };
        serde_yaml_ng::to_string(&TemplateExport::from_template(&template))
            .map_err(|e| TemplateError::Serialization(e.to_string()))
    }

    /// Import a template from its portable YAML form, minting fresh IDs.
    pub async fn import(
        &self,
        yaml: &str,
        project_id: Option<i64>,
    ) -> Result<WorkflowTemplate, TemplateError> {
        let export: TemplateExport = serde_yaml_ng::from_str(yaml)
            .map_err(|e| TemplateError::Serialization(e.to_string()))?;
        if export.name.trim().is_empty() {
            return Err(TemplateError::Invalid("template name is empty".to_string()));
        }
        let template = export.into_template(project_id);
        self.repo.create_template(&template).await?;
        Ok(template)
    }

    /// Seed the built-in "Standard Pipeline" when no global default exists.
    ///
    /// Called once at engine startup. Returns the effective global default.
    pub async fn ensure_default_template(&self) -> Result<WorkflowTemplate, TemplateError> {
        if let Some(existing) = self.repo.get_default_template(None).await? {
            return Ok(existing);
        }
        let template = standard_pipeline();
        info!(template_id = %template.id, "seeding default workflow template");
        self.repo.create_template(&template).await?;
        Ok(template)
    }
}

fn gemini_flash() -> ProviderConfig {
    ProviderConfig {
        provider_type: ProviderType::GeminiSdk,
        model_name: "gemini-2.0-flash".to_string(),
        temperature: 0.1,
        context_length: 8192,
        endpoint_url: None,
    }
}

fn claude_code() -> ProviderConfig {
    ProviderConfig {
        provider_type: ProviderType::ClaudeCode,
        model_name: String::new(),
        temperature: 0.1,
        context_length: 8192,
        endpoint_url: None,
    }
}

fn phase(
    name: &str,
    role: PhaseRole,
    provider_config: ProviderConfig,
    prompt_template: &str,
    output_artifact_type: ArtifactType,
    order: u32,
) -> WorkflowPhase {
    WorkflowPhase {
        id: Uuid::now_v7(),
        name: name.to_string(),
        role,
        provider_config,
        prompt_template: prompt_template.to_string(),
        output_artifact_type,
        success_pattern: "/complete".to_string(),
        can_skip: true,
        can_iterate: false,
        max_retries: 2,
        timeout_secs: 3600,
        parallel_with: None,
        order,
    }
}

/// The built-in five-stage pipeline: Analysis, Documentation,
/// Implementation, parallel Functional/Style Review, Verification.
pub fn standard_pipeline() -> WorkflowTemplate {
    let mut implementation = phase(
        "Implementation",
        PhaseRole::Implementer,
        claude_code(),
        "Implement the planned changes:\n\n\
         ## Implementation Plan\n{artifact:documentation}\n\n\
         ## Task\n{task_description}\n\n\
         ## Project Path\n{project_path}\n\n\
         ## Instructions\n\
         1. Follow the implementation plan exactly\n\
         2. Make incremental changes\n\
         3. Test each change\n\
         4. Create atomic commits\n\n\
         End with /complete when implementation is done.",
        ArtifactType::CodeDiff,
        2,
    );
    implementation.can_iterate = true;

    let mut functional_review = phase(
        "Functional Review",
        PhaseRole::ReviewerFunctional,
        ProviderConfig {
            provider_type: ProviderType::Openai,
            model_name: "gpt-4o".to_string(),
            temperature: 0.1,
            context_length: 8192,
            endpoint_url: None,
        },
        "Review the implementation for functional correctness:\n\n\
         ## Original Task\n{task_description}\n\n\
         ## Implementation\n{artifact:implementation}\n\n\
         ## Instructions\n\
         Review for:\n\
         1. Correctness - does it solve the problem?\n\
         2. Edge cases - are they handled?\n\
         3. Error handling - is it robust?\n\
         4. Logic - any bugs or issues?\n\n\
         Provide specific feedback. If changes needed, list them clearly.\n\
         If approved, end with /complete.",
        ArtifactType::ReviewReport,
        3,
    );
    functional_review.parallel_with = Some("Style Review".to_string());

    let mut style_review = phase(
        "Style Review",
        PhaseRole::ReviewerStyle,
        gemini_flash(),
        "Review the implementation for code style and best practices:\n\n\
         ## Implementation\n{artifact:implementation}\n\n\
         ## Instructions\n\
         Review for:\n\
         1. Code style consistency\n\
         2. Naming conventions\n\
         3. Documentation quality\n\
         4. Best practices adherence\n\
         5. Performance considerations\n\n\
         Provide specific feedback. If changes needed, list them clearly.\n\
         If approved, end with /complete.",
        ArtifactType::ReviewReport,
        3,
    );
    style_review.parallel_with = Some("Functional Review".to_string());

    let phases = vec![
        phase(
            "Analysis",
            PhaseRole::Analyzer,
            gemini_flash(),
            "Analyze this codebase and task:\n\n\
             ## Task\n{task_description}\n\n\
             ## Project Path\n{project_path}\n\n\
             ## Instructions\n\
             1. Understand the existing code structure\n\
             2. Identify relevant files and modules\n\
             3. List dependencies and patterns used\n\
             4. Create a detailed task breakdown\n\n\
             Output a structured analysis document with:\n\
             - Overview of relevant code\n\
             - List of files to modify\n\
             - Technical approach\n\
             - Potential risks\n\n\
             End with /complete when done.",
            ArtifactType::TaskList,
            0,
        ),
        phase(
            "Documentation",
            PhaseRole::Planner,
            gemini_flash(),
            "Based on the analysis, create implementation documentation:\n\n\
             ## Previous Analysis\n{artifact:analysis}\n\n\
             ## Task\n{task_description}\n\n\
             ## Instructions\n\
             Create a detailed implementation plan including:\n\
             1. Step-by-step implementation guide\n\
             2. Code patterns to follow\n\
             3. Testing requirements\n\
             4. Acceptance criteria\n\n\
             End with /complete when done.",
            ArtifactType::ImplementationPlan,
            1,
        ),
        implementation,
        functional_review,
        style_review,
        phase(
            "Verification",
            PhaseRole::Verifier,
            claude_code(),
            "Verify the implementation:\n\n\
             ## Project Path\n{project_path}\n\n\
             ## Instructions\n\
             1. Run lint checks\n\
             2. Run tests\n\
             3. Run build\n\
             4. Verify all checks pass\n\n\
             Report results. End with /complete if all pass.",
            ArtifactType::VerificationReport,
            4,
        ),
    ];

    let now = Utc::now();
    WorkflowTemplate {
        id: Uuid::now_v7(),
        name: "Standard Pipeline".to_string(),
        description: "Default multi-LLM workflow: Analysis, Documentation, Implementation, \
                      Review, Verification"
            .to_string(),
        phases,
        max_iterations: 3,
        iteration_behavior: IterationBehavior::AutoIterate,
        failure_behavior: FailureBehavior::PauseNotify,
        budget_limit: None,
        is_default: true,
        is_global: true,
        project_id: None,
        created_at: now,
        updated_at: now,
    }
}
