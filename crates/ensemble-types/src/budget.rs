//! Budget tracking domain types.
//!
//! A `BudgetTracker` is a scoped spend ledger. Exactly one tracker exists
//! per (scope, scope_id) pair, lazily created on first use. Updates are
//! monotonic increments until an explicit reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Which ledger a spend is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    Execution,
    Project,
    Global,
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BudgetScope::Execution => "execution",
            BudgetScope::Project => "project",
            BudgetScope::Global => "global",
        };
        write!(f, "{s}")
    }
}

impl FromStr for BudgetScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execution" => Ok(BudgetScope::Execution),
            "project" => Ok(BudgetScope::Project),
            "global" => Ok(BudgetScope::Global),
            other => Err(format!("invalid budget scope: '{other}'")),
        }
    }
}

/// A scoped cost-and-token ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetTracker {
    /// UUIDv7 tracker ID.
    pub id: Uuid,
    pub scope: BudgetScope,
    /// Execution id, project id as string, or "global".
    pub scope_id: String,
    pub period_start: DateTime<Utc>,
    /// No limit means the scope is always within budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_limit: Option<f64>,
    pub total_spent: f64,
    pub token_count_input: u64,
    pub token_count_output: u64,
}

impl BudgetTracker {
    /// Create a fresh tracker for a scope.
    pub fn new(scope: BudgetScope, scope_id: impl Into<String>, budget_limit: Option<f64>) -> Self {
        Self {
            id: Uuid::now_v7(),
            scope,
            scope_id: scope_id.into(),
            period_start: Utc::now(),
            budget_limit,
            total_spent: 0.0,
            token_count_input: 0,
            token_count_output: 0,
        }
    }

    /// Whether a hypothetical additional spend still fits, and the remaining
    /// headroom (infinity when no limit is set).
    pub fn check_budget(&self, additional_cost: f64) -> (bool, f64) {
        match self.budget_limit {
            Some(limit) => {
                let remaining = limit - self.total_spent;
                (self.total_spent + additional_cost <= limit, remaining)
            }
            None => (true, f64::INFINITY),
        }
    }
}

/// Read-only snapshot of one scope's ledger, for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub scope: BudgetScope,
    pub scope_id: String,
    pub budget_limit: Option<f64>,
    pub total_spent: f64,
    pub remaining: Option<f64>,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub total_tokens: u64,
    pub within_budget: bool,
    pub period_start: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_roundtrip() {
        for scope in [BudgetScope::Execution, BudgetScope::Project, BudgetScope::Global] {
            let s = scope.to_string();
            let parsed: BudgetScope = s.parse().unwrap();
            assert_eq!(parsed, scope);
        }
    }

    #[test]
    fn new_tracker_starts_empty() {
        let tracker = BudgetTracker::new(BudgetScope::Execution, "exec-1", Some(10.0));
        assert_eq!(tracker.total_spent, 0.0);
        assert_eq!(tracker.token_count_input, 0);
        assert_eq!(tracker.budget_limit, Some(10.0));
    }

    #[test]
    fn check_budget_with_limit() {
        let mut tracker = BudgetTracker::new(BudgetScope::Execution, "exec-1", Some(1.0));
        tracker.total_spent = 0.4;

        let (ok, remaining) = tracker.check_budget(0.0);
        assert!(ok);
        assert!((remaining - 0.6).abs() < 1e-9);

        let (ok, _) = tracker.check_budget(0.7);
        assert!(!ok);
    }

    #[test]
    fn check_budget_without_limit_always_ok() {
        let mut tracker = BudgetTracker::new(BudgetScope::Global, "global", None);
        tracker.total_spent = 1_000_000.0;
        let (ok, remaining) = tracker.check_budget(1_000_000.0);
        assert!(ok);
        assert!(remaining.is_infinite());
    }

    #[test]
    fn tracker_json_roundtrip() {
        let tracker = BudgetTracker::new(BudgetScope::Project, "42", Some(25.0));
        let json = serde_json::to_string(&tracker).unwrap();
        let parsed: BudgetTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.scope, BudgetScope::Project);
        assert_eq!(parsed.scope_id, "42");
        assert_eq!(parsed.budget_limit, Some(25.0));
    }
}
