//! Conductor CLI entry point.
//!
//! Binary name: `conductor`
//!
//! Loads engine configuration, initializes tracing, then dispatches to the
//! command handler.

mod cli;

use std::path::PathBuf;

use clap::Parser;
use conductor_core::config::{ConfigLoadError, DEFAULT_CONFIG_FILE, read_engine_config};
use conductor_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
use conductor_types::config::{EngineConfig, LogFormat};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    // Logging is configured from this file, so a rejected file is reported
    // only once the subscriber is up.
    let (config, rejected) = config_or_default(read_engine_config(&config_path).await);

    // -q / -v override the configured filter
    let filter = match cli.verbose {
        0 if cli.quiet => "error".to_string(),
        0 => config.logging.filter.clone(),
        1 => "info,conductor_core=debug".to_string(),
        _ => "trace".to_string(),
    };
    let options = TracingOptions::new(filter)
        .json(config.logging.format == LogFormat::Json)
        .otel(config.logging.otel);
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
    match &rejected {
        Some(err) => tracing::warn!(error = %err, "config ignored, using defaults"),
        None => tracing::debug!(config = %config_path.display(), "configuration loaded"),
    }

    let result = match cli.command {
        Commands::Validate { file } => cli::plan::validate(&file, cli.json).await,
        Commands::Waves { file } => cli::plan::waves(&file, cli.json).await,
        Commands::Simulate { file, goal, fail } => {
            cli::simulate::simulate(&file, &goal, fail, &config, cli.json).await
        }
    };

    shutdown_tracing();
    result
}

/// Fall back to defaults for a missing or rejected config file, keeping the
/// rejection so it can be logged.
fn config_or_default(
    loaded: Result<Option<EngineConfig>, ConfigLoadError>,
) -> (EngineConfig, Option<ConfigLoadError>) {
    match loaded {
        Ok(Some(config)) => (config, None),
        Ok(None) => (EngineConfig::default(), None),
        Err(err) => (EngineConfig::default(), Some(err)),
    }
}
