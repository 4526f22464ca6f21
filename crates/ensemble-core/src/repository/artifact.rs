//! Artifact repository trait definition.

use ensemble_types::artifact::{Artifact, ArtifactContent};
use ensemble_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for artifact persistence.
///
/// Artifacts are append-mostly: records are created once and only their
/// content may be replaced afterwards. The engine never deletes them.
pub trait ArtifactRepository: Send + Sync {
    fn create_artifact(
        &self,
        artifact: &Artifact,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_artifact(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Artifact>, RepositoryError>> + Send;

    /// Replace the content of an existing artifact.
    fn update_content(
        &self,
        id: Uuid,
        content: &ArtifactContent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All artifacts produced by one workflow execution, oldest first.
    fn list_by_execution(
        &self,
        execution_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Artifact>, RepositoryError>> + Send;
}
