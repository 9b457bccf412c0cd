//! Workflow engine for composing agent calls into multi-step pipelines.
//!
//! Everything executable is a [`Step`](workflow::step::Step): single agent
//! invocations, plain callables, sequential pipelines, predicate routers,
//! bounded parallel groups, and the plan-then-execute scheduler. Steps share
//! data through one [`WorkflowContext`](workflow::context::WorkflowContext)
//! per run. Agents are external collaborators reached through the
//! [`Agent`](agent::Agent) trait.

pub mod agent;
pub mod config;
pub mod event;
pub mod workflow;
