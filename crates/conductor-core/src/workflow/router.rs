//! Predicate-selected dispatch.

use std::sync::Arc;

use serde_json::Value;

use super::context::WorkflowContext;
use super::error::StepError;
use super::step::{BoxStep, Step};

type Predicate = Arc<dyn Fn(&WorkflowContext) -> Result<bool, StepError> + Send + Sync>;

#[derive(Clone)]
struct Route {
    predicate: Predicate,
    step: BoxStep,
}

/// Runs the first child whose predicate holds, or the default step.
///
/// Predicates are evaluated strictly in order and short-circuit. With no
/// match and no default the router fails with `NoRouteMatched`.
#[derive(Clone)]
pub struct Router {
    name: String,
    routes: Vec<Route>,
    default: Option<BoxStep>,
}

impl Router {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: Vec::new(),
            default: None,
        }
    }

    /// Add a route guarded by an infallible predicate.
    pub fn route<P>(self, predicate: P, step: impl Step + 'static) -> Self
    where
        P: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
    {
        self.try_route(move |ctx| Ok(predicate(ctx)), step)
    }

    /// Add a route whose predicate may fail, e.g. on a missing context key.
    pub fn try_route<P>(mut self, predicate: P, step: impl Step + 'static) -> Self
    where
        P: Fn(&WorkflowContext) -> Result<bool, StepError> + Send + Sync + 'static,
    {
        self.routes.push(Route {
            predicate: Arc::new(predicate),
            step: step.boxed(),
        });
        self
    }

    pub fn default_step(mut self, step: impl Step + 'static) -> Self {
        self.default = Some(step.boxed());
        self
    }

    /// Pick the step to run, without running it.
    fn select(&self, ctx: &WorkflowContext) -> Result<&BoxStep, StepError> {
        for (idx, route) in self.routes.iter().enumerate() {
            let matched = (route.predicate)(ctx)
                .map_err(|e| e.in_step(format!("{} predicate", self.name), Some(idx)))?;
            if matched {
                tracing::debug!(router = %self.name, route = idx, step = %route.step.name(), "route selected");
                return Ok(&route.step);
            }
        }

        match &self.default {
            Some(step) => {
                tracing::debug!(router = %self.name, step = %step.name(), "default route selected");
                Ok(step)
            }
            None => Err(StepError::NoRouteMatched {
                router: self.name.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("routes", &self.routes.iter().map(|r| r.step.name()).collect::<Vec<_>>())
            .field("default", &self.default.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl Step for Router {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &WorkflowContext) -> Result<Value, StepError> {
        let step = self.select(ctx).inspect_err(|e| {
            tracing::warn!(router = %self.name, error = %e, "routing failed");
        })?;
        step.run(ctx).await.map_err(|e| e.in_step(step.name(), None))
    }
}
