//! Error types for step execution and plan handling.

use conductor_types::task::InvalidTransition;
use thiserror::Error;

use crate::agent::AgentError;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors returned by [`Step::run`](super::step::Step::run).
///
/// Composite steps wrap a child's error with the child's identity before
/// passing it up, so the `Display` output of a deep failure reads as a
/// causal chain from the outermost step down to the root cause.
#[derive(Debug, Error)]
pub enum StepError {
    /// A step needed a context key that was never written.
    #[error("missing context key '{0}'")]
    MissingContextKey(String),

    /// A context value exists but does not have the expected shape.
    #[error("context key '{key}' has an unexpected value: {source}")]
    InvalidContextValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A router found no matching predicate and has no default step.
    #[error("router '{router}': no route matched and no default step is set")]
    NoRouteMatched { router: String },

    /// Planner output could not be turned into task records.
    #[error("plan parse error: {0}")]
    PlanParse(#[from] PlanParseError),

    /// The plan's dependency relation contains a cycle.
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// A task depends on an ID that is not part of the plan.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    /// A scheduled task failed in the executor.
    #[error("task '{task_id}' failed: {source}")]
    TaskExecution {
        task_id: String,
        #[source]
        source: Box<StepError>,
    },

    /// One or more children of a parallel group failed.
    #[error("parallel group '{group}' failed: {}", describe_failures(failures))]
    AggregateParallel {
        group: String,
        failures: Vec<ChildFailure>,
    },

    /// A child step failed; annotated by its parent with the child's identity.
    #[error("{} failed: {source}", describe_step(step, *position))]
    StepFailed {
        step: String,
        /// Declaration index within the parent, when the parent is ordered.
        position: Option<usize>,
        #[source]
        source: Box<StepError>,
    },

    /// A collaborating agent failed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A step was constructed with values it cannot run with.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A task status change violated the lifecycle.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// The run was cancelled before this step was dispatched.
    #[error("workflow cancelled")]
    Cancelled,

    /// A concurrently dispatched child panicked.
    #[error("step '{step}' panicked: {message}")]
    Panicked { step: String, message: String },

    /// Error raised by a user callable.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    /// Wrap `self` with the identity of the step that produced it.
    pub fn in_step(self, step: impl Into<String>, position: Option<usize>) -> Self {
        StepError::StepFailed {
            step: step.into(),
            position,
            source: Box::new(self),
        }
    }

    /// Follow identity wrappers down to the underlying failure.
    pub fn root_cause(&self) -> &StepError {
        match self {
            StepError::StepFailed { source, .. } | StepError::TaskExecution { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

/// One failed child of a parallel group.
#[derive(Debug)]
pub struct ChildFailure {
    pub name: String,
    pub error: StepError,
}

fn describe_failures(failures: &[ChildFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("'{}': {}", f.name, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_step(step: &str, position: Option<usize>) -> String {
    match position {
        Some(idx) => format!("step #{idx} '{step}'"),
        None => format!("step '{step}'"),
    }
}

// ---------------------------------------------------------------------------
// PlanParseError
// ---------------------------------------------------------------------------

/// Planner output that cannot be turned into a valid list of task records.
///
/// Every variant names the offending record (by index, and by ID once known)
/// and field. Records are never dropped or patched.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("no JSON payload found in planner output")]
    NoPayload,

    #[error("planner output is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("planner output has no 'tasks' list")]
    MissingTasks,

    #[error("record {index} is not an object")]
    NotAnObject { index: usize },

    #[error("record {index}: missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("{}: field '{field}' {reason}", describe_record(*index, task_id.as_deref()))]
    InvalidField {
        index: usize,
        task_id: Option<String>,
        field: &'static str,
        reason: String,
    },

    #[error("duplicate task id '{0}'")]
    DuplicateId(String),
}

fn describe_record(index: usize, task_id: Option<&str>) -> String {
    match task_id {
        Some(id) => format!("record {index} (task '{id}')"),
        None => format!("record {index}"),
    }
}
