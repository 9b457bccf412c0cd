//! BoxAgent -- object-safe dynamic dispatch wrapper for Agent.
//!
//! 1. Define an object-safe `AgentDyn` trait with boxed futures
//! 2. Blanket-impl `AgentDyn` for all `T: Agent`
//! 3. `BoxAgent` wraps `Arc<dyn AgentDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use conductor_types::message::ChatMessage;
use serde_json::Value;

use super::AgentError;
use super::provider::Agent;

/// Object-safe version of [`Agent`] with boxed futures.
pub trait AgentDyn: Send + Sync {
    fn name(&self) -> &str;

    fn invoke_boxed<'a>(
        &'a self,
        task: &'a str,
        history: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<Value, AgentError>> + Send + 'a>>;
}

impl<T: Agent> AgentDyn for T {
    fn name(&self) -> &str {
        Agent::name(self)
    }

    fn invoke_boxed<'a>(
        &'a self,
        task: &'a str,
        history: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<Value, AgentError>> + Send + 'a>> {
        Box::pin(self.invoke(task, history))
    }
}

/// Type-erased, cheaply cloneable agent handle.
///
/// One agent is typically shared by several steps (and by every task of a
/// scheduler wave), so the handle is reference counted.
#[derive(Clone)]
pub struct BoxAgent {
    inner: Arc<dyn AgentDyn>,
}

impl BoxAgent {
    /// Wrap a concrete `Agent` in a type-erased handle.
    pub fn new<T: Agent + 'static>(agent: T) -> Self {
        Self {
            inner: Arc::new(agent),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn invoke(&self, task: &str, history: &[ChatMessage]) -> Result<Value, AgentError> {
        self.inner.invoke_boxed(task, history).await
    }
}

impl std::fmt::Debug for BoxAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxAgent").field("name", &self.name()).finish()
    }
}
