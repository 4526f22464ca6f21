//! SQLite budget repository implementation.
//!
//! One row per (scope, scope_id). Increments run as a single UPDATE so
//! concurrent spends on the same scope never lose counts.

use sqlx::Row;

use ensemble_core::repository::budget::BudgetRepository;
use ensemble_types::budget::{BudgetScope, BudgetTracker};
use ensemble_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `BudgetRepository`.
pub struct SqliteBudgetRepository {
    pool: DatabasePool,
}

impl SqliteBudgetRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct TrackerRow {
    id: String,
    scope: String,
    scope_id: String,
    period_start: String,
    budget_limit: Option<f64>,
    total_spent: f64,
    token_count_input: i64,
    token_count_output: i64,
}

impl TrackerRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            scope: row.try_get("scope")?,
            scope_id: row.try_get("scope_id")?,
            period_start: row.try_get("period_start")?,
            budget_limit: row.try_get("budget_limit")?,
            total_spent: row.try_get("total_spent")?,
            token_count_input: row.try_get("token_count_input")?,
            token_count_output: row.try_get("token_count_output")?,
        })
    }

    fn into_tracker(self) -> Result<BudgetTracker, RepositoryError> {
        let scope: BudgetScope = self
            .scope
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        Ok(BudgetTracker {
            id: parse_uuid(&self.id)?,
            scope,
            scope_id: self.scope_id,
            period_start: parse_datetime(&self.period_start)?,
            budget_limit: self.budget_limit,
            total_spent: self.total_spent,
            token_count_input: self.token_count_input as u64,
            token_count_output: self.token_count_output as u64,
        })
    }
}

impl BudgetRepository for SqliteBudgetRepository {
    async fn create_tracker(&self, tracker: &BudgetTracker) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO budget_trackers
               (id, scope, scope_id, period_start, budget_limit, total_spent,
                token_count_input, token_count_output)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(tracker.id.to_string())
        .bind(tracker.scope.to_string())
        .bind(&tracker.scope_id)
        .bind(format_datetime(&tracker.period_start))
        .bind(tracker.budget_limit)
        .bind(tracker.total_spent)
        .bind(tracker.token_count_input as i64)
        .bind(tracker.token_count_output as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_tracker(
        &self,
        scope: BudgetScope,
        scope_id: &str,
    ) -> Result<Option<BudgetTracker>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM budget_trackers WHERE scope = ? AND scope_id = ?")
            .bind(scope.to_string())
            .bind(scope_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r =
                    TrackerRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_tracker()?))
            }
            None => Ok(None),
        }
    }

    async fn increment(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        cost: f64,
        tokens_input: u64,
        tokens_output: u64,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE budget_trackers SET
                 total_spent = total_spent + ?,
                 token_count_input = token_count_input + ?,
                 token_count_output = token_count_output + ?
               WHERE scope = ? AND scope_id = ?"#,
        )
        .bind(cost)
        .bind(tokens_input as i64)
        .bind(tokens_output as i64)
        .bind(scope.to_string())
        .bind(scope_id)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn set_limit(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        limit: Option<f64>,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE budget_trackers SET budget_limit = ? WHERE scope = ? AND scope_id = ?")
                .bind(limit)
                .bind(scope.to_string())
                .bind(scope_id)
                .execute(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn reset(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        period_start: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE budget_trackers SET
                 total_spent = 0,
                 token_count_input = 0,
                 token_count_output = 0,
                 period_start = ?
               WHERE scope = ? AND scope_id = ?"#,
        )
        .bind(format_datetime(&period_start))
        .bind(scope.to_string())
        .bind(scope_id)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
