//! Observability setup for conductor binaries.

pub mod tracing_setup;
