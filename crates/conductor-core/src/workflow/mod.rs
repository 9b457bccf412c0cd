//! Workflow engine: steps, composites, and the plan-execute scheduler.
//!
//! - [`step`]: the `Step` trait and the type-erased `BoxStep` handle.
//! - [`context`]: the shared key-value store threaded through a run.
//! - [`leaf`]: `AgentStep` and `FunctionStep`.
//! - [`pipeline`], [`router`], [`parallel`]: composite steps.
//! - [`plan`]: tolerant planner-output parsing and plan state.
//! - [`dag`]: dependency graph, cycle detection, wave preview.
//! - [`scheduler`]: `PlanExecuteScheduler`, itself a `Step`.

pub mod context;
pub mod dag;
pub mod error;
pub mod leaf;
pub mod parallel;
pub mod pipeline;
pub mod plan;
pub mod router;
pub mod scheduler;
pub mod step;

pub use context::WorkflowContext;
pub use error::{ChildFailure, PlanParseError, StepError};
pub use leaf::{AgentStep, FunctionStep};
pub use parallel::Parallel;
pub use pipeline::Pipeline;
pub use router::Router;
pub use scheduler::{PlanExecuteScheduler, SchedulerOutcome};
pub use step::{BoxStep, Step};
