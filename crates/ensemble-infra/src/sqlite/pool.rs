//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time. This module provides a
//! `DatabasePool` with a multi-connection reader pool for concurrent reads
//! and a single-connection writer pool for serialized writes. Both use WAL
//! journal mode and enforce foreign keys. The schema is embedded and applied
//! idempotently when the pool is created.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::debug;

/// Idempotent schema. Templates are stored as JSON blobs next to the
/// columns the default-template and scope queries filter on; executions and
/// phase executions are fully columnar so recovery and list queries never
/// deserialize blobs.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_templates (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    is_default  INTEGER NOT NULL DEFAULT 0,
    is_global   INTEGER NOT NULL DEFAULT 1,
    project_id  INTEGER,
    template    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_templates_scope
    ON workflow_templates(is_global, project_id, is_default);

CREATE TABLE IF NOT EXISTS workflow_executions (
    id                  TEXT PRIMARY KEY,
    template_id         TEXT NOT NULL,
    template_name       TEXT NOT NULL,
    trigger_mode        TEXT NOT NULL,
    project_id          INTEGER,
    project_path        TEXT NOT NULL DEFAULT '',
    issue_session_id    INTEGER,
    task_description    TEXT NOT NULL DEFAULT '',
    status              TEXT NOT NULL,
    current_phase_id    TEXT,
    iteration           INTEGER NOT NULL DEFAULT 1,
    total_tokens_input  INTEGER NOT NULL DEFAULT 0,
    total_tokens_output INTEGER NOT NULL DEFAULT 0,
    total_cost_usd      REAL NOT NULL DEFAULT 0,
    artifact_ids        TEXT NOT NULL DEFAULT '[]',
    budget_limit        REAL,
    iteration_behavior  TEXT NOT NULL,
    interactive_mode    INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    started_at          TEXT,
    completed_at        TEXT
);
CREATE INDEX IF NOT EXISTS idx_executions_status
    ON workflow_executions(status, created_at);
CREATE INDEX IF NOT EXISTS idx_executions_project
    ON workflow_executions(project_id, created_at);

CREATE TABLE IF NOT EXISTS phase_executions (
    id                  TEXT PRIMARY KEY,
    execution_id        TEXT NOT NULL REFERENCES workflow_executions(id),
    phase_id            TEXT NOT NULL,
    phase_name          TEXT NOT NULL,
    phase_role          TEXT NOT NULL,
    status              TEXT NOT NULL,
    tokens_input        INTEGER NOT NULL DEFAULT 0,
    tokens_output       INTEGER NOT NULL DEFAULT 0,
    cost_usd            REAL NOT NULL DEFAULT 0,
    output_artifact_id  TEXT,
    error               TEXT,
    started_at          TEXT,
    completed_at        TEXT
);
CREATE INDEX IF NOT EXISTS idx_phase_executions_execution
    ON phase_executions(execution_id, id);

CREATE TABLE IF NOT EXISTS budget_trackers (
    id                  TEXT NOT NULL,
    scope               TEXT NOT NULL,
    scope_id            TEXT NOT NULL,
    period_start        TEXT NOT NULL,
    budget_limit        REAL,
    total_spent         REAL NOT NULL DEFAULT 0,
    token_count_input   INTEGER NOT NULL DEFAULT 0,
    token_count_output  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (scope, scope_id)
);

CREATE TABLE IF NOT EXISTS artifacts (
    id                  TEXT PRIMARY KEY,
    execution_id        TEXT NOT NULL,
    phase_execution_id  TEXT NOT NULL,
    artifact_type       TEXT NOT NULL,
    name                TEXT NOT NULL,
    content             TEXT NOT NULL,
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_artifacts_execution
    ON artifacts(execution_id, id);
"#;

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: Multi-connection pool (up to 8) for concurrent SELECT queries.
/// - `writer`: Single-connection pool for serialized INSERT/UPDATE/DELETE.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Create a new DatabasePool with split reader/writer connections.
    ///
    /// Applies the embedded schema on the writer pool before the reader
    /// pool opens. Both pools use WAL journal mode, foreign key
    /// enforcement, and a 5-second busy timeout.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);
        let write_opts = base_opts;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_opts)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&writer).await?;
        debug!("schema applied");

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(read_opts)
            .await?;

        Ok(Self { reader, writer })
    }
}

/// Returns the default database URL based on `ENSEMBLE_DATA_DIR` env var,
/// falling back to `~/.ensemble/ensemble.db`.
pub fn default_database_url() -> String {
    let data_dir = std::env::var("ENSEMBLE_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.ensemble")
    });
    format!("sqlite://{data_dir}/ensemble.db")
}
