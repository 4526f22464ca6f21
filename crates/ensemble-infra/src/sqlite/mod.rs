//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod artifact;
pub mod budget;
pub mod pool;
pub mod workflow;

pub use artifact::SqliteArtifactRepository;
pub use budget::SqliteBudgetRepository;
pub use pool::DatabasePool;
pub use workflow::SqliteWorkflowRepository;

use ensemble_types::error::RepositoryError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize a snake_case serde enum to its bare string form for a TEXT
/// column.
fn enum_to_str<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    let json = serde_json::to_value(value).map_err(|e| RepositoryError::Query(e.to_string()))?;
    json.as_str()
        .map(str::to_string)
        .ok_or_else(|| RepositoryError::Query("enum did not serialize to a string".to_string()))
}

/// Parse a TEXT column back into a snake_case serde enum.
fn enum_from_str<T: DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid {what}: '{s}'")))
}

fn parse_uuid(s: &str) -> Result<uuid::Uuid, RepositoryError> {
    s.parse::<uuid::Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<chrono::DateTime<chrono::Utc>, RepositoryError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339()
}
