//! Closure-backed agent.
//!
//! Adapts a synchronous function into an [`Agent`]. Useful for deterministic
//! collaborators: rule-based classifiers, canned planners, offline simulation.

use conductor_types::message::ChatMessage;
use serde_json::Value;

use super::AgentError;
use super::provider::Agent;

/// An [`Agent`] backed by a plain function.
pub struct FnAgent<F> {
    name: String,
    func: F,
}

impl<F> FnAgent<F>
where
    F: Fn(&str, &[ChatMessage]) -> Result<Value, AgentError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Agent for FnAgent<F>
where
    F: Fn(&str, &[ChatMessage]) -> Result<Value, AgentError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, task: &str, history: &[ChatMessage]) -> Result<Value, AgentError> {
        (self.func)(task, history)
    }
}
