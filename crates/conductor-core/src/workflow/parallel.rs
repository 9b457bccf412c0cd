//! Bounded-concurrency fan-out over independent child steps.
//!
//! Children are spawned into a `JoinSet`; a `Semaphore` permit is acquired
//! before each spawn, so at most `max_workers` children are in flight and the
//! rest wait for a free slot. Every child settles before the group returns:
//! a failing child does not cancel its siblings.
//!
//! All children share the caller's context. Children of one group must write
//! disjoint keys; overlapping writes are not detected.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use conductor_types::config::ParallelConfig;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::context::WorkflowContext;
use super::error::{ChildFailure, StepError};
use super::step::{BoxStep, Step};

/// Outcome of one child, keyed by the child's name.
pub type ChildOutcome = (String, Result<Value, StepError>);

/// Runs named children concurrently and collects a name -> result map.
#[derive(Debug, Clone)]
pub struct Parallel {
    name: String,
    children: Vec<BoxStep>,
    max_workers: usize,
}

impl Parallel {
    /// Build a group. Child names key the result map, so they must be unique.
    pub fn new(name: impl Into<String>, children: Vec<BoxStep>, max_workers: usize) -> Result<Self, StepError> {
        let name = name.into();
        if max_workers == 0 {
            return Err(StepError::InvalidConfiguration(format!(
                "parallel group '{name}': max_workers must be at least 1"
            )));
        }

        let mut seen = HashSet::new();
        for child in &children {
            if !seen.insert(child.name()) {
                return Err(StepError::InvalidConfiguration(format!(
                    "parallel group '{name}': duplicate child name '{}'",
                    child.name()
                )));
            }
        }

        Ok(Self {
            name,
            children,
            max_workers,
        })
    }

    /// Build a group bounded by the configured default.
    pub fn from_config(
        name: impl Into<String>,
        children: Vec<BoxStep>,
        config: &ParallelConfig,
    ) -> Result<Self, StepError> {
        Self::new(name, children, config.max_workers)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Run every child and return each outcome in declaration order.
    ///
    /// Never fails as a whole. Children not yet dispatched when the context
    /// is cancelled settle as `Cancelled`; a panicking child settles as
    /// `Panicked`.
    pub async fn run_settled(&self, ctx: &WorkflowContext) -> Vec<ChildOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut join_set = JoinSet::new();
        let mut outcomes: Vec<Option<Result<Value, StepError>>> = Vec::with_capacity(self.children.len());
        outcomes.resize_with(self.children.len(), || None);

        for (idx, child) in self.children.iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    outcomes[idx] = Some(Err(StepError::Cancelled));
                    continue;
                }
            };

            if ctx.is_cancelled() {
                tracing::debug!(group = %self.name, step = %child.name(), "skipping dispatch, cancelled");
                outcomes[idx] = Some(Err(StepError::Cancelled));
                continue;
            }

            tracing::debug!(group = %self.name, step = %child.name(), "dispatching");

            let child = child.clone();
            let child_ctx = ctx.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(child.run(&child_ctx)).catch_unwind().await;
                let result = outcome.unwrap_or_else(|payload| {
                    Err(StepError::Panicked {
                        step: child.name().to_string(),
                        message: panic_message(payload.as_ref()),
                    })
                });
                (idx, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, result)) => outcomes[idx] = Some(result),
                Err(join_err) => {
                    tracing::error!(group = %self.name, error = %join_err, "child task aborted");
                }
            }
        }

        self.children
            .iter()
            .zip(outcomes)
            .map(|(child, outcome)| {
                let result = outcome.unwrap_or_else(|| {
                    Err(StepError::Panicked {
                        step: child.name().to_string(),
                        message: "task aborted before reporting".to_string(),
                    })
                });
                (child.name().to_string(), result)
            })
            .collect()
    }
}

impl Step for Parallel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &WorkflowContext) -> Result<Value, StepError> {
        let start = Instant::now();
        tracing::info!(
            group = %self.name,
            children = self.children.len(),
            max_workers = self.max_workers,
            "parallel group started"
        );

        let mut results = Map::new();
        let mut failures = Vec::new();
        for (name, outcome) in self.run_settled(ctx).await {
            match outcome {
                Ok(value) => {
                    results.insert(name, value);
                }
                Err(error) => failures.push(ChildFailure { name, error }),
            }
        }

        if !failures.is_empty() {
            tracing::warn!(
                group = %self.name,
                failed = failures.len(),
                succeeded = results.len(),
                "parallel group failed"
            );
            return Err(StepError::AggregateParallel {
                group: self.name.clone(),
                failures,
            });
        }

        tracing::info!(
            group = %self.name,
            duration_ms = start.elapsed().as_millis() as u64,
            "parallel group completed"
        );
        Ok(Value::Object(results))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
