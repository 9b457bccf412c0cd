//! Leaf steps: adapt an agent invocation or a plain callable into a `Step`.

use std::future::Future;
use std::sync::Arc;

use conductor_types::message::ChatMessage;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::agent::BoxAgent;

use super::context::WorkflowContext;
use super::error::StepError;
use super::step::Step;

/// Default context key an `AgentStep` reads its task from.
pub const DEFAULT_INPUT_KEY: &str = "task";

/// Default context key an `AgentStep` writes its result to.
pub const DEFAULT_OUTPUT_KEY: &str = "result";

// ---------------------------------------------------------------------------
// AgentStep
// ---------------------------------------------------------------------------

/// Invokes an agent with input taken from the context.
///
/// The input is either the value under `input_key` or, when set, the
/// `input_template` rendered against the context. The agent's response is
/// written to `output_key` and returned.
#[derive(Debug, Clone)]
pub struct AgentStep {
    name: String,
    agent: BoxAgent,
    input_key: String,
    output_key: String,
    input_template: Option<String>,
    history_key: Option<String>,
}

impl AgentStep {
    pub fn new(name: impl Into<String>, agent: BoxAgent) -> Self {
        Self {
            name: name.into(),
            agent,
            input_key: DEFAULT_INPUT_KEY.to_string(),
            output_key: DEFAULT_OUTPUT_KEY.to_string(),
            input_template: None,
            history_key: None,
        }
    }

    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = key.into();
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    /// Render the agent input from `{{ key }}` placeholders instead of
    /// reading `input_key`.
    pub fn with_input_template(mut self, template: impl Into<String>) -> Self {
        self.input_template = Some(template.into());
        self
    }

    /// Pass the `ChatMessage` list stored under `key` to the agent as prior
    /// conversation. An absent key means no history.
    pub fn with_history_key(mut self, key: impl Into<String>) -> Self {
        self.history_key = Some(key.into());
        self
    }

    pub fn input_key(&self) -> &str {
        &self.input_key
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    fn build_input(&self, ctx: &WorkflowContext) -> Result<String, StepError> {
        match &self.input_template {
            Some(template) => ctx.render(template),
            None => ctx.get_text(&self.input_key),
        }
    }

    fn history(&self, ctx: &WorkflowContext) -> Result<Vec<ChatMessage>, StepError> {
        match &self.history_key {
            Some(key) => ctx.get_or(key, Vec::new()),
            None => Ok(Vec::new()),
        }
    }
}

impl Step for AgentStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &WorkflowContext) -> Result<Value, StepError> {
        let input = self.build_input(ctx)?;
        let history = self.history(ctx)?;

        tracing::debug!(
            step = %self.name,
            agent = %self.agent.name(),
            history = history.len(),
            "invoking agent"
        );

        let result = self.agent.invoke(&input, &history).await?;
        ctx.set(self.output_key.clone(), result.clone());
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// FunctionStep
// ---------------------------------------------------------------------------

type StepFn = Arc<dyn Fn(WorkflowContext) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Runs a user callable that receives the context.
///
/// The callable gets its own handle onto the shared store. Returning a
/// `StepError` (through `anyhow`) keeps its kind; any other error surfaces
/// as [`StepError::Other`].
#[derive(Clone)]
pub struct FunctionStep {
    name: String,
    func: StepFn,
    input_key: Option<String>,
    output_key: Option<String>,
}

impl FunctionStep {
    /// Wrap an async callable.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx| Box::pin(func(ctx))),
            input_key: None,
            output_key: None,
        }
    }

    /// Wrap a synchronous callable.
    pub fn sync<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&WorkflowContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx| {
                let result = func(&ctx);
                Box::pin(async move { result })
            }),
            input_key: None,
            output_key: None,
        }
    }

    /// Require `key` to be present before the callable runs.
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    /// Write the callable's result to `key`.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }
}

impl std::fmt::Debug for FunctionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionStep")
            .field("name", &self.name)
            .field("input_key", &self.input_key)
            .field("output_key", &self.output_key)
            .finish()
    }
}

impl Step for FunctionStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &WorkflowContext) -> Result<Value, StepError> {
        if let Some(key) = &self.input_key {
            if !ctx.has(key) {
                return Err(StepError::MissingContextKey(key.clone()));
            }
        }

        let result = (self.func)(ctx.clone()).await.map_err(into_step_error)?;

        if let Some(key) = &self.output_key {
            ctx.set(key.clone(), result.clone());
        }
        Ok(result)
    }
}

fn into_step_error(err: anyhow::Error) -> StepError {
    match err.downcast::<StepError>() {
        Ok(step_err) => step_err,
        Err(other) => StepError::Other(other),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
