//! Engine configuration loader.
//!
//! Reads a TOML file into [`EngineConfig`]. Falls back to defaults when the
//! file is missing, unreadable, malformed, or holds values the engine cannot
//! run with.

use std::path::{Path, PathBuf};

use conductor_types::config::{ConfigError, EngineConfig};
use thiserror::Error;

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "conductor.toml";

/// Why a config file present on disk could not be used.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config in {}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
}

/// Read and validate the config at `path`.
///
/// Returns `Ok(None)` when the file does not exist.
pub async fn read_engine_config(path: &Path) -> Result<Option<EngineConfig>, ConfigLoadError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigLoadError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let config = toml::from_str::<EngineConfig>(&content).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate().map_err(|source| ConfigLoadError::Invalid {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(config))
}

/// Load engine configuration from `path`, falling back to
/// [`EngineConfig::default()`].
///
/// A missing file is logged at debug level; a file that cannot be used is
/// logged as a warning. Callers that set up logging from the loaded config
/// should use [`read_engine_config`] and report the error themselves.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    match read_engine_config(path).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            EngineConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            EngineConfig::default()
        }
    }
}
