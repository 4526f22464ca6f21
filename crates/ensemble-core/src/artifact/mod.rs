//! Artifact store.
//!
//! Thin service over `ArtifactRepository` that hides where an artifact's
//! content lives. Inline content is returned directly; external content is
//! read from disk on demand. The engine never deletes artifacts.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use ensemble_types::artifact::{Artifact, ArtifactContent, ArtifactType};
use ensemble_types::error::RepositoryError;

use crate::repository::ArtifactRepository;

pub struct ArtifactStore<A: ArtifactRepository> {
    repo: Arc<A>,
}

impl<A: ArtifactRepository> ArtifactStore<A> {
    pub fn new(repo: Arc<A>) -> Self {
        Self { repo }
    }

    /// Create and persist a new artifact with inline content.
    pub async fn put(
        &self,
        execution_id: Uuid,
        phase_execution_id: Uuid,
        artifact_type: ArtifactType,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Artifact, RepositoryError> {
        let artifact = Artifact {
            id: Uuid::now_v7(),
            execution_id,
            phase_execution_id,
            artifact_type,
            name: name.into(),
            content: ArtifactContent::Inline {
                text: content.into(),
            },
            created_at: chrono::Utc::now(),
        };
        self.repo.create_artifact(&artifact).await?;
        debug!(artifact_id = %artifact.id, name = %artifact.name, "stored artifact");
        Ok(artifact)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Artifact>, RepositoryError> {
        self.repo.get_artifact(id).await
    }

    /// Resolve an artifact's content to text, wherever it lives.
    pub async fn read_content(&self, id: Uuid) -> Result<Option<String>, RepositoryError> {
        let Some(artifact) = self.repo.get_artifact(id).await? else {
            return Ok(None);
        };
        match artifact.content {
            ArtifactContent::Inline { text } => Ok(Some(text)),
            ArtifactContent::External { path } => {
                let text = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| RepositoryError::Query(format!("read {path}: {e}")))?;
                Ok(Some(text))
            }
        }
    }

    /// Replace an existing artifact's content with new inline text.
    pub async fn update_content(
        &self,
        id: Uuid,
        content: impl Into<String>,
    ) -> Result<(), RepositoryError> {
        let content = ArtifactContent::Inline {
            text: content.into(),
        };
        self.repo.update_content(id, &content).await
    }

    /// All artifacts produced by one execution, oldest first.
    pub async fn list_by_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<Artifact>, RepositoryError> {
        self.repo.list_by_execution(execution_id).await
    }
}
