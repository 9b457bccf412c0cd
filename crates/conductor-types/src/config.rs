//! Engine configuration types.
//!
//! `EngineConfig` is the top-level `conductor.toml`. Every field has a
//! default, so an empty file (or no file) yields a working configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers("parallel"));
        }
        if self.scheduler.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers("scheduler"));
        }
        for (field, key) in [
            ("task_key", &self.scheduler.task_key),
            ("result_key", &self.scheduler.result_key),
            ("plan_key", &self.scheduler.plan_key),
            ("task_results_key", &self.scheduler.task_results_key),
        ] {
            if key.trim().is_empty() {
                return Err(ConfigError::EmptyKey(field));
            }
        }
        Ok(())
    }
}

/// Default bound for `Parallel` groups built from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

/// Plan-execute scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrency bound for each wave.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Context key holding the task description.
    #[serde(default = "default_task_key")]
    pub task_key: String,
    /// Context key receiving the summarizer output.
    #[serde(default = "default_result_key")]
    pub result_key: String,
    /// Context key receiving the plan with final statuses.
    #[serde(default = "default_plan_key")]
    pub plan_key: String,
    /// Context key receiving the id -> result map.
    #[serde(default = "default_task_results_key")]
    pub task_results_key: String,
    /// Characters of each task result shown to the summarizer (0 = unlimited).
    #[serde(default = "default_summary_result_chars")]
    pub summary_result_chars: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            task_key: default_task_key(),
            result_key: default_result_key(),
            plan_key: default_plan_key(),
            task_results_key: default_task_results_key(),
            summary_result_chars: default_summary_result_chars(),
        }
    }
}

/// Logging settings consumed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Line format of the stderr log.
    #[serde(default)]
    pub format: LogFormat,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
            otel: false,
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

fn default_max_workers() -> usize {
    4
}

fn default_task_key() -> String {
    "task".to_string()
}

fn default_result_key() -> String {
    "result".to_string()
}

fn default_plan_key() -> String {
    "plan".to_string()
}

fn default_task_results_key() -> String {
    "task_results".to_string()
}

fn default_summary_result_chars() -> usize {
    200
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0}.max_workers must be at least 1")]
    ZeroWorkers(&'static str),

    #[error("scheduler.{0} must not be empty")]
    EmptyKey(&'static str),
}
