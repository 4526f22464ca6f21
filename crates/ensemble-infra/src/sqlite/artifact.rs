//! SQLite artifact repository implementation.
//!
//! The content column stores the tagged `ArtifactContent` JSON, so inline
//! and external artifacts share one shape.

use sqlx::Row;
use uuid::Uuid;

use ensemble_core::repository::artifact::ArtifactRepository;
use ensemble_types::artifact::{Artifact, ArtifactContent};
use ensemble_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{enum_from_str, enum_to_str, format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `ArtifactRepository`.
pub struct SqliteArtifactRepository {
    pool: DatabasePool,
}

impl SqliteArtifactRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct ArtifactRow {
    id: String,
    execution_id: String,
    phase_execution_id: String,
    artifact_type: String,
    name: String,
    content: String,
    created_at: String,
}

impl ArtifactRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            phase_execution_id: row.try_get("phase_execution_id")?,
            artifact_type: row.try_get("artifact_type")?,
            name: row.try_get("name")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_artifact(self) -> Result<Artifact, RepositoryError> {
        let content: ArtifactContent = serde_json::from_str(&self.content)
            .map_err(|e| RepositoryError::Query(format!("invalid artifact content JSON: {e}")))?;

        Ok(Artifact {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            phase_execution_id: parse_uuid(&self.phase_execution_id)?,
            artifact_type: enum_from_str(&self.artifact_type, "artifact type")?,
            name: self.name,
            content,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl ArtifactRepository for SqliteArtifactRepository {
    async fn create_artifact(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        let content = serde_json::to_string(&artifact.content)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO artifacts
               (id, execution_id, phase_execution_id, artifact_type, name, content, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(artifact.id.to_string())
        .bind(artifact.execution_id.to_string())
        .bind(artifact.phase_execution_id.to_string())
        .bind(enum_to_str(&artifact.artifact_type)?)
        .bind(&artifact.name)
        .bind(&content)
        .bind(format_datetime(&artifact.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ArtifactRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_artifact()?))
            }
            None => Ok(None),
        }
    }

    async fn update_content(
        &self,
        id: Uuid,
        content: &ArtifactContent,
    ) -> Result<(), RepositoryError> {
        let content = serde_json::to_string(content)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = sqlx::query("UPDATE artifacts SET content = ? WHERE id = ?")
            .bind(&content)
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_by_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<Artifact>, RepositoryError> {
        // UUIDv7 ids sort by creation time
        let rows = sqlx::query("SELECT * FROM artifacts WHERE execution_id = ? ORDER BY id ASC")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut artifacts = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ArtifactRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            artifacts.push(r.into_artifact()?);
        }
        Ok(artifacts)
    }
}
