//! Sequential composite.

use std::time::Instant;

use serde_json::Value;

use super::context::WorkflowContext;
use super::error::StepError;
use super::step::{BoxStep, Step};

/// Runs children in declaration order over one context and returns the last
/// child's result (`null` for an empty pipeline).
///
/// The first failure stops the pipeline. It is surfaced wrapped with the
/// failing child's position and name.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    children: Vec<BoxStep>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, children: Vec<BoxStep>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    /// Append a child.
    pub fn then(mut self, step: impl Step + 'static) -> Self {
        self.children.push(step.boxed());
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Step for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &WorkflowContext) -> Result<Value, StepError> {
        let start = Instant::now();
        tracing::info!(pipeline = %self.name, steps = self.children.len(), "pipeline started");

        let mut last = Value::Null;
        for (idx, child) in self.children.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::warn!(pipeline = %self.name, position = idx, "pipeline cancelled");
                return Err(StepError::Cancelled);
            }

            tracing::debug!(pipeline = %self.name, position = idx, step = %child.name(), "running step");

            last = match child.run(ctx).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        pipeline = %self.name,
                        position = idx,
                        step = %child.name(),
                        error = %e,
                        "pipeline step failed"
                    );
                    return Err(e.in_step(child.name(), Some(idx)));
                }
            };
        }

        tracing::info!(
            pipeline = %self.name,
            duration_ms = start.elapsed().as_millis() as u64,
            "pipeline completed"
        );
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::leaf::FunctionStep;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn recording(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> FunctionStep {
        FunctionStep::sync(name, move |_| {
            log.lock().unwrap().push(name);
            Ok(json!(name))
        })
    }

    #[tokio::test]
    async fn test_runs_in_order_and_returns_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new("p", vec![])
            .then(recording("a", log.clone()))
            .then(recording("b", log.clone()))
            .then(recording("c", log.clone()));

        let out = pipeline.run(&WorkflowContext::new()).await.unwrap();
        assert_eq!(out, json!("c"));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_returns_null() {
        let pipeline = Pipeline::new("empty", vec![]);
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.run(&WorkflowContext::new()).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_fail_fast_annotates_position() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new("p", vec![])
            .then(recording("a", log.clone()))
            .then(FunctionStep::sync("needs_x", |ctx| Ok(ctx.require("x")?)))
            .then(recording("c", log.clone()));

        let err = pipeline.run(&WorkflowContext::new()).await.unwrap_err();
        match &err {
            StepError::StepFailed { step, position, .. } => {
                assert_eq!(step, "needs_x");
                assert_eq!(*position, Some(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.root_cause(), StepError::MissingContextKey(k) if k == "x"));
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_next_child() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new("p", vec![])
            .then(FunctionStep::sync("stop", |ctx| {
                ctx.cancel();
                Ok(Value::Null)
            }))
            .then(recording("after", log.clone()));

        let err = pipeline.run(&WorkflowContext::new()).await.unwrap_err();
        assert!(matches!(err, StepError::Cancelled));
        assert!(log.lock().unwrap().is_empty());
    }
}
