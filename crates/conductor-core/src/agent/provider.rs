//! Agent trait definition.
//!
//! Uses native async fn in traits (RPITIT) for `invoke`. Dynamic dispatch goes
//! through [`BoxAgent`](super::BoxAgent).

use conductor_types::message::ChatMessage;
use serde_json::Value;

use super::AgentError;

/// A reasoning agent the engine can delegate a task to.
///
/// The response is a JSON value: a string for plain text, or any structured
/// value the agent produces.
pub trait Agent: Send + Sync {
    /// Human-readable agent name used in logs and errors.
    fn name(&self) -> &str;

    /// Run the agent on `task`, with `history` as prior conversation.
    fn invoke(
        &self,
        task: &str,
        history: &[ChatMessage],
    ) -> impl std::future::Future<Output = Result<Value, AgentError>> + Send;
}
