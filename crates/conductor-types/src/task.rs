//! Plan task types.
//!
//! A plan is parsed once per scheduler run from planner output. Each
//! `TaskSpec` is the validated record the planner produced; `Task` wraps it
//! with the mutable lifecycle state the scheduler drives.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// TaskSpec
// ---------------------------------------------------------------------------

/// A validated planner record: `{id, description, depends_on[]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task ID, unique within a plan.
    pub id: String,
    /// What the executor should do.
    pub description: String,
    /// IDs of tasks that must be done before this one may start.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, description: impl Into<String>, depends_on: Vec<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            depends_on,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a task inside one scheduler run.
///
/// Transitions are monotonic: `pending -> ready -> running -> {done | failed}`.
/// `unreachable` is assigned from `pending` when an ancestor failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    Unreachable,
}

impl TaskStatus {
    /// Whether the task has settled and will never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Unreachable)
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Unreachable)
                | (Ready, Running)
                | (Running, Done)
                | (Running, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task '{task_id}' cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub task_id: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A plan task together with its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(flatten)]
    pub spec: TaskSpec,
    pub status: TaskStatus,
    /// Executor output, set once the task is done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure cause (failed) or the blocking ancestor (unreachable).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            status: TaskStatus::Pending,
            result: None,
            failure: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn description(&self) -> &str {
        &self.spec.description
    }

    pub fn depends_on(&self) -> &[String] {
        &self.spec.depends_on
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                task_id: self.spec.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn mark_ready(&mut self) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Ready)
    }

    pub fn mark_running(&mut self) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Running)
    }

    pub fn complete(&mut self, result: Value) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Done)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Failed)?;
        self.failure = Some(reason.into());
        Ok(())
    }

    /// Mark a pending task as never dispatchable because `blocked_by` failed
    /// (directly or through another unreachable task).
    pub fn mark_unreachable(&mut self, blocked_by: &str) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Unreachable)?;
        self.failure = Some(format!("unreachable: depends on failed task '{blocked_by}'"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str) -> Task {
        Task::new(TaskSpec::new(id, "do something", vec![]))
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut t = task("t1");
        t.mark_ready().unwrap();
        t.mark_running().unwrap();
        t.complete(json!("ok")).unwrap();
        assert_eq!(t.status, TaskStatus::Done);
        assert_eq!(t.result, Some(json!("ok")));
        assert!(t.status.is_terminal());
    }

    #[test]
    fn test_cannot_skip_running() {
        let mut t = task("t1");
        t.mark_ready().unwrap();
        let err = t.complete(json!("too early")).unwrap_err();
        assert_eq!(err.from, TaskStatus::Ready);
        assert_eq!(err.to, TaskStatus::Done);
        assert!(t.result.is_none());
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut t = task("t1");
        t.mark_ready().unwrap();
        t.mark_running().unwrap();
        t.fail("boom").unwrap();
        assert!(t.mark_ready().is_err());
        assert!(t.mark_unreachable("t0").is_err());
        assert_eq!(t.failure.as_deref(), Some("boom"));
    }

    #[test]
    fn test_unreachable_only_from_pending() {
        let mut t = task("t2");
        t.mark_unreachable("t1").unwrap();
        assert_eq!(t.status, TaskStatus::Unreachable);
        assert!(t.failure.unwrap().contains("'t1'"));

        let mut running = task("t3");
        running.mark_ready().unwrap();
        running.mark_running().unwrap();
        assert!(running.mark_unreachable("t1").is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(TaskStatus::Unreachable).unwrap(), json!("unreachable"));
        assert_eq!(TaskStatus::Done.to_string(), "done");
    }

    #[test]
    fn test_task_serializes_flat() {
        let mut t = Task::new(TaskSpec::new("t1", "research", vec!["t0".to_string()]));
        t.mark_unreachable("t0").unwrap();
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["id"], json!("t1"));
        assert_eq!(v["depends_on"], json!(["t0"]));
        assert_eq!(v["status"], json!("unreachable"));
        assert!(v.get("result").is_none());
    }
}
