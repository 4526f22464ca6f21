//! Budget repository trait definition.

use ensemble_types::budget::{BudgetScope, BudgetTracker};
use ensemble_types::error::RepositoryError;

/// Repository trait for budget tracker persistence.
///
/// One row per (scope, scope_id). `increment` must be atomic with respect to
/// concurrent increments on the same row.
pub trait BudgetRepository: Send + Sync {
    /// Insert a new tracker.
    fn create_tracker(
        &self,
        tracker: &BudgetTracker,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get the tracker for a scope, if it exists.
    fn get_tracker(
        &self,
        scope: BudgetScope,
        scope_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<BudgetTracker>, RepositoryError>> + Send;

    /// Atomically add spend and token counts to a scope's tracker.
    fn increment(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        cost: f64,
        tokens_input: u64,
        tokens_output: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace a tracker's limit.
    fn set_limit(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        limit: Option<f64>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Zero a tracker's counters and restart its period.
    fn reset(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        period_start: chrono::DateTime<chrono::Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
