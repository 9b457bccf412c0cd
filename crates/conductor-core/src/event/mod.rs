//! Scheduler progress events.
//!
//! [`EventBus`] fans `WorkflowEvent`s out to any number of subscribers;
//! [`drain`] collects what a receiver has buffered.

pub mod bus;

pub use bus::{EventBus, drain};
