//! Shared domain types for conductor.
//!
//! Plain data used across the engine, the CLI, and event consumers:
//! plan tasks and their lifecycle, chat messages handed to agents,
//! scheduler events, and engine configuration.
//!
//! Zero runtime dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod event;
pub mod message;
pub mod task;
