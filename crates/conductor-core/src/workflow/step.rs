//! The `Step` trait and its type-erased handle.
//!
//! Every executable node implements [`Step`]. Composites hold their children
//! as [`BoxStep`] so that leaves, pipelines, routers, parallel groups, and
//! schedulers nest freely.
//!
//! Pattern (same as [`BoxAgent`](crate::agent::BoxAgent)):
//! 1. `Step` uses RPITIT for the async `run`
//! 2. Object-safe `StepDyn` with a boxed future, blanket-implemented for all `T: Step`
//! 3. `BoxStep` wraps `Arc<dyn StepDyn>` and implements `Step` again

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::context::WorkflowContext;
use super::error::StepError;

/// An executable workflow node.
///
/// A step reads what it needs from the context, may write declared output
/// keys, and returns its result. Steps are immutable configuration, so one
/// instance may run many times and appear under several parents.
pub trait Step: Send + Sync {
    /// Identity used in logs and error chains.
    fn name(&self) -> &str;

    /// Run against a shared context.
    fn run(&self, ctx: &WorkflowContext) -> impl Future<Output = Result<Value, StepError>> + Send;

    /// Run against a fresh context lifted from `initial`.
    ///
    /// Accepts an existing `WorkflowContext` or a plain JSON map.
    fn execute(
        &self,
        initial: impl Into<WorkflowContext>,
    ) -> impl Future<Output = Result<Value, StepError>> + Send
    where
        Self: Sized,
    {
        let ctx = initial.into();
        async move { self.run(&ctx).await }
    }

    /// Erase the concrete type.
    fn boxed(self) -> BoxStep
    where
        Self: Sized + 'static,
    {
        BoxStep::new(self)
    }
}

/// Object-safe version of [`Step`] with a boxed future.
pub trait StepDyn: Send + Sync {
    fn name(&self) -> &str;

    fn run_boxed<'a>(
        &'a self,
        ctx: &'a WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>>;
}

impl<T: Step> StepDyn for T {
    fn name(&self) -> &str {
        Step::name(self)
    }

    fn run_boxed<'a>(
        &'a self,
        ctx: &'a WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>> {
        Box::pin(self.run(ctx))
    }
}

/// Type-erased, cheaply cloneable step handle.
#[derive(Clone)]
pub struct BoxStep {
    inner: Arc<dyn StepDyn>,
}

impl BoxStep {
    pub fn new<T: Step + 'static>(step: T) -> Self {
        Self {
            inner: Arc::new(step),
        }
    }
}

impl Step for BoxStep {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, ctx: &WorkflowContext) -> Result<Value, StepError> {
        self.inner.run_boxed(ctx).await
    }

    fn boxed(self) -> BoxStep {
        self
    }
}

impl std::fmt::Debug for BoxStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStep").field("name", &self.inner.name()).finish()
    }
}
