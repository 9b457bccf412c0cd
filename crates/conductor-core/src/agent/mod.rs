//! Agent collaborator seam.
//!
//! Reasoning agents live outside the engine. The engine only needs one
//! capability from them: given a task and optional prior messages, produce a
//! response. Agents may loop internally (tool calls, retries); that is opaque
//! here.

pub mod box_agent;
pub mod fn_agent;
pub mod provider;

pub use box_agent::BoxAgent;
pub use fn_agent::FnAgent;
pub use provider::Agent;

use thiserror::Error;

/// Errors reported by an agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// The agent could not produce a response.
    #[error("agent '{agent}' invocation failed: {message}")]
    Invocation { agent: String, message: String },

    /// The agent responded, but the response cannot be used.
    #[error("agent '{agent}' returned unusable output: {message}")]
    InvalidOutput { agent: String, message: String },
}

impl AgentError {
    pub fn invocation(agent: impl Into<String>, message: impl Into<String>) -> Self {
        AgentError::Invocation {
            agent: agent.into(),
            message: message.into(),
        }
    }
}
