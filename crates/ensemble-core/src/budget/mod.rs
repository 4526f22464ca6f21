//! Scoped budget ledger.
//!
//! `BudgetLedger` accounts provider spend against three independent scopes:
//! one tracker per execution, one per project, and one global. Trackers are
//! lazily created on first use and cached in-process; every increment is
//! written through to the repository before the cache is updated.
//!
//! Cross-scope recording is three independent writes with no transaction
//! spanning them. A crash between writes can leave scopes briefly
//! inconsistent; the ledger accepts that and reconciles on next read.

mod pricing;

pub use pricing::{estimate_cost, format_cost};

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use ensemble_types::budget::{BudgetScope, BudgetSummary, BudgetTracker};
use ensemble_types::error::RepositoryError;
use ensemble_types::llm::ProviderType;

use crate::repository::BudgetRepository;

/// Scope id used for the single global tracker.
pub const GLOBAL_SCOPE_ID: &str = "global";

/// Outcome of recording one unit of provider usage.
#[derive(Debug, Clone, Copy)]
pub struct RecordedUsage {
    /// Estimated cost of this usage event in USD.
    pub cost_usd: f64,
    /// Whether every touched scope remains within its limit.
    pub within_budget: bool,
}

/// Cost-and-token accounting across execution, project, and global scopes.
pub struct BudgetLedger<B: BudgetRepository> {
    repo: Arc<B>,
    trackers: DashMap<(BudgetScope, String), BudgetTracker>,
}

impl<B: BudgetRepository> BudgetLedger<B> {
    pub fn new(repo: Arc<B>) -> Self {
        Self {
            repo,
            trackers: DashMap::new(),
        }
    }

    /// Load a scope's tracker, creating it (with no limit) on first use.
    async fn get_or_create(
        &self,
        scope: BudgetScope,
        scope_id: &str,
    ) -> Result<BudgetTracker, RepositoryError> {
        let key = (scope, scope_id.to_string());
        if let Some(tracker) = self.trackers.get(&key) {
            return Ok(tracker.clone());
        }

        if let Some(tracker) = self.repo.get_tracker(scope, scope_id).await? {
            self.trackers.insert(key, tracker.clone());
            return Ok(tracker);
        }

        let tracker = BudgetTracker::new(scope, scope_id, None);
        self.repo.create_tracker(&tracker).await?;
        self.trackers.insert(key, tracker.clone());
        Ok(tracker)
    }

    /// Ensure a tracker exists with the given limit.
    ///
    /// Used when an execution is created with an explicit budget limit.
    pub async fn ensure_tracker(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        budget_limit: Option<f64>,
    ) -> Result<(), RepositoryError> {
        self.get_or_create(scope, scope_id).await?;
        if budget_limit.is_some() {
            self.set_limit(scope, scope_id, budget_limit).await?;
        }
        Ok(())
    }

    /// Estimate the cost of a usage event and charge it against one scope.
    ///
    /// Returns the cost and whether the scope remains within its limit
    /// (no limit means always within).
    pub async fn record_usage(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        provider_type: ProviderType,
        model: &str,
        tokens_input: u64,
        tokens_output: u64,
    ) -> Result<RecordedUsage, RepositoryError> {
        let cost = pricing::estimate_cost(provider_type, model, tokens_input, tokens_output);
        let within = self
            .apply_increment(scope, scope_id, cost, tokens_input, tokens_output)
            .await?;
        Ok(RecordedUsage {
            cost_usd: cost,
            within_budget: within,
        })
    }

    /// Charge one usage event against the execution scope, the owning
    /// project scope (if any), and the global scope.
    ///
    /// The returned `within_budget` is the logical AND across all scopes
    /// touched. The cost is estimated once and applied to each scope.
    pub async fn record_execution_usage(
        &self,
        execution_id: Uuid,
        project_id: Option<i64>,
        provider_type: ProviderType,
        model: &str,
        tokens_input: u64,
        tokens_output: u64,
    ) -> Result<RecordedUsage, RepositoryError> {
        let cost = pricing::estimate_cost(provider_type, model, tokens_input, tokens_output);

        let mut within = self
            .apply_increment(
                BudgetScope::Execution,
                &execution_id.to_string(),
                cost,
                tokens_input,
                tokens_output,
            )
            .await?;

        if let Some(project_id) = project_id {
            within &= self
                .apply_increment(
                    BudgetScope::Project,
                    &project_id.to_string(),
                    cost,
                    tokens_input,
                    tokens_output,
                )
                .await?;
        }

        within &= self
            .apply_increment(
                BudgetScope::Global,
                GLOBAL_SCOPE_ID,
                cost,
                tokens_input,
                tokens_output,
            )
            .await?;

        if !within {
            warn!(
                %execution_id,
                cost = %pricing::format_cost(cost),
                "usage event pushed a budget scope over its limit"
            );
        }

        Ok(RecordedUsage {
            cost_usd: cost,
            within_budget: within,
        })
    }

    async fn apply_increment(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        cost: f64,
        tokens_input: u64,
        tokens_output: u64,
    ) -> Result<bool, RepositoryError> {
        let mut tracker = self.get_or_create(scope, scope_id).await?;

        self.repo
            .increment(scope, scope_id, cost, tokens_input, tokens_output)
            .await?;

        tracker.total_spent += cost;
        tracker.token_count_input += tokens_input;
        tracker.token_count_output += tokens_output;
        let (within, remaining) = tracker.check_budget(0.0);
        debug!(
            %scope,
            scope_id,
            spent = tracker.total_spent,
            remaining,
            "recorded budget usage"
        );

        self.trackers
            .insert((scope, scope_id.to_string()), tracker);
        Ok(within)
    }

    /// Whether a hypothetical additional spend would still fit a scope's
    /// limit. Does not mutate any state. Returns the answer plus the
    /// remaining headroom (infinite when no limit is set).
    pub async fn check_budget(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        additional_cost: f64,
    ) -> Result<(bool, f64), RepositoryError> {
        let tracker = self.get_or_create(scope, scope_id).await?;
        Ok(tracker.check_budget(additional_cost))
    }

    /// Replace a scope's limit (`None` removes it).
    pub async fn set_limit(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        limit: Option<f64>,
    ) -> Result<(), RepositoryError> {
        self.get_or_create(scope, scope_id).await?;
        self.repo.set_limit(scope, scope_id, limit).await?;

        let key = (scope, scope_id.to_string());
        if let Some(mut tracker) = self.trackers.get_mut(&key) {
            tracker.budget_limit = limit;
        }
        Ok(())
    }

    /// Zero a scope's counters and restart its accounting period.
    pub async fn reset(
        &self,
        scope: BudgetScope,
        scope_id: &str,
    ) -> Result<(), RepositoryError> {
        self.get_or_create(scope, scope_id).await?;
        let period_start = chrono::Utc::now();
        self.repo.reset(scope, scope_id, period_start).await?;

        let key = (scope, scope_id.to_string());
        if let Some(mut tracker) = self.trackers.get_mut(&key) {
            tracker.total_spent = 0.0;
            tracker.token_count_input = 0;
            tracker.token_count_output = 0;
            tracker.period_start = period_start;
        }
        Ok(())
    }

    /// Read-only snapshot of one scope's ledger.
    pub async fn summary(
        &self,
        scope: BudgetScope,
        scope_id: &str,
    ) -> Result<BudgetSummary, RepositoryError> {
        let tracker = self.get_or_create(scope, scope_id).await?;
        let (within_budget, remaining) = tracker.check_budget(0.0);
        Ok(BudgetSummary {
            scope,
            scope_id: scope_id.to_string(),
            budget_limit: tracker.budget_limit,
            total_spent: tracker.total_spent,
            remaining: tracker.budget_limit.map(|_| remaining),
            tokens_input: tracker.token_count_input,
            tokens_output: tracker.token_count_output,
            total_tokens: tracker.token_count_input + tracker.token_count_output,
            within_budget,
            period_start: tracker.period_start,
        })
    }
}
