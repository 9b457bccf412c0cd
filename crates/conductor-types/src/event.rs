//! Event types for the scheduler event bus.
//!
//! `WorkflowEvent` is broadcast while a plan-execute run progresses.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::TaskStatus;

/// Events emitted during a plan-execute run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// The planner output was parsed and validated.
    PlanCreated {
        run_id: Uuid,
        scheduler: String,
        task_ids: Vec<String>,
    },

    /// A batch of ready tasks was dispatched together.
    WaveStarted {
        run_id: Uuid,
        /// 0-based wave index.
        wave: usize,
        task_ids: Vec<String>,
    },

    /// A task was handed to the executor.
    TaskStarted { run_id: Uuid, task_id: String },

    /// A task finished successfully.
    TaskCompleted {
        run_id: Uuid,
        task_id: String,
        duration_ms: u64,
    },

    /// A task failed. Its dependents become unreachable.
    TaskFailed {
        run_id: Uuid,
        task_id: String,
        error: String,
    },

    /// A task will never run because an ancestor failed.
    TaskUnreachable {
        run_id: Uuid,
        task_id: String,
        blocked_by: String,
    },

    /// Every task settled and the summarizer produced the final result.
    RunCompleted {
        run_id: Uuid,
        scheduler: String,
        duration_ms: u64,
        /// Final status per task, in plan order.
        statuses: Vec<(String, TaskStatus)>,
        finished_at: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    /// The task this event is about, for task-scoped variants.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::TaskStarted { task_id, .. }
            | WorkflowEvent::TaskCompleted { task_id, .. }
            | WorkflowEvent::TaskFailed { task_id, .. }
            | WorkflowEvent::TaskUnreachable { task_id, .. } => Some(task_id),

            WorkflowEvent::PlanCreated { .. }
            | WorkflowEvent::WaveStarted { .. }
            | WorkflowEvent::RunCompleted { .. } => None,
        }
    }
}
