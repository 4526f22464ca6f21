//! Artifact domain types.
//!
//! An artifact is a named, typed unit of phase output. Content may be held
//! inline or by reference to externally persisted bytes; the artifact store
//! hides the distinction from callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of output a phase produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    TaskList,
    ImplementationPlan,
    CodeDiff,
    ReviewReport,
    VerificationReport,
    Custom,
}

/// Where an artifact's content lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactContent {
    /// Content stored directly on the record.
    Inline { text: String },
    /// Content persisted externally; `path` locates the bytes.
    External { path: String },
}

/// A typed, named output produced by a phase, consumable by later phases.
///
/// Immutable once created except through the store's explicit
/// content-update operation; never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// UUIDv7 artifact ID.
    pub id: Uuid,
    pub execution_id: Uuid,
    pub phase_execution_id: Uuid,
    pub artifact_type: ArtifactType,
    pub name: String,
    pub content: ArtifactContent,
    pub created_at: DateTime<Utc>,
}
