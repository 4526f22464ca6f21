//! Bounded in-process cache of executions being driven.
//!
//! Avoids redundant store reads during the run loop. Populated lazily,
//! written only by the orchestrator, and invalidated on every persisted
//! mutation so it never diverges from the store. UUIDv7 keys are
//! time-sortable, so eviction drops the oldest execution.

use dashmap::DashMap;
use uuid::Uuid;

use ensemble_types::workflow::WorkflowExecution;

pub struct ExecutionRegistry {
    capacity: usize,
    entries: DashMap<Uuid, WorkflowExecution>,
}

impl ExecutionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<WorkflowExecution> {
        self.entries.get(&id).map(|e| e.clone())
    }

    /// Cache an execution snapshot, evicting the oldest entry when full.
    pub fn insert(&self, execution: WorkflowExecution) {
        self.entries.insert(execution.id, execution);
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.entries.iter().map(|e| *e.key()).min() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    /// Drop a cached snapshot after a write made it stale.
    pub fn invalidate(&self, id: Uuid) {
        self.entries.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ExecutionRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}
