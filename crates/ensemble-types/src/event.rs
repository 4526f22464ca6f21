//! Workflow lifecycle events.
//!
//! These are the sole channel through which the engine is observed. The
//! surrounding application subscribes via the event bus and relays events to
//! its UI or API layer; the engine itself never talks to a front end.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{PhaseExecution, WorkflowStatus};

/// Event published on the workflow event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A phase is about to run.
    PhaseStarted {
        execution_id: Uuid,
        phase_id: Uuid,
        phase_name: String,
    },

    /// A fragment of streamed phase output. The only place partial output
    /// is observable before phase completion.
    PhaseOutput {
        execution_id: Uuid,
        phase_id: Uuid,
        text: String,
    },

    /// A phase attempt reached a terminal phase status.
    PhaseCompleted {
        execution_id: Uuid,
        phase_execution: PhaseExecution,
    },

    /// The execution's status changed.
    StatusChanged {
        execution_id: Uuid,
        status: WorkflowStatus,
    },

    /// A yes/no decision was requested from the caller.
    ApprovalRequested {
        execution_id: Uuid,
        message: String,
    },
}
