//! Broker configuration.
//!
//! Supports YAML file and environment variable overrides.

use std::path::Path;

use serde::Deserialize;

use crate::pubsub::ChannelConfig;
pub use crate::utils::retry::RetryConfig;

/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "COURIER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "COURIER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "COURIER_LOG";
/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "courier.yaml";

/// In-memory pubsub settings.
pub type PubSubConfig = ChannelConfig;

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Broker configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Retry middleware backoff.
    pub retry: RetryConfig,
    /// PubSub queueing.
    pub pubsub: PubSubConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `courier.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, `__` nested
    ///    (e.g. `COURIER__RETRY__MAX_ATTEMPTS=5`)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::from(config_path).format(FileFormat::Yaml));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.pubsub.subscriber_buffer == Some(0) {
            return Err(ConfigError::Invalid(
                "pubsub.subscriber_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create config for testing: millisecond backoff, few attempts.
    pub fn for_test() -> Self {
        Self {
            retry: RetryConfig {
                initial_interval_ms: 10,
                multiplier: 2.0,
                max_interval_ms: 100,
                max_attempts: 3,
            },
            pubsub: PubSubConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests;
