//! Runtime configuration.
//!
//! Values come from an optional TOML file, overridden by `SALVOR__*`
//! environment variables (`SALVOR__CALLBACK_SECRET`,
//! `SALVOR__DISPATCH__MAX_RETRIES`, ...). Everything except the callback
//! secret has a default.

use std::path::Path;

use config::{Config, ConfigBuilder, Environment, File as ConfigFile, FileFormat};
use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchConfig;
use crate::error::{Result, SalvorError};

const ENV_PREFIX: &str = "SALVOR";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SalvorConfig {
    pub dispatch: DispatchConfig,

    /// Shared secret the compute service sends back in `X-Internal-Secret`
    pub callback_secret: String,

    /// PostgreSQL connection string, when the `postgres` store is used
    pub database_url: Option<String>,
}

impl SalvorConfig {
    /// Load from `path` (if given) and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(ConfigFile::from(path).required(true));
        }
        Self::build(builder)
    }

    /// Load from an in-memory TOML document and the environment, then validate.
    pub fn from_toml(document: &str) -> Result<Self> {
        Self::build(Config::builder().add_source(ConfigFile::from_str(document, FileFormat::Toml)))
    }

    fn build(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: SalvorConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        tracing::debug!(
            endpoint = %config.dispatch.endpoint_url,
            max_concurrent = config.dispatch.max_concurrent_dispatches,
            has_database_url = config.database_url.is_some(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Reject configurations the system cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.callback_secret.trim().is_empty() {
            return Err(SalvorError::Validation(
                "callback_secret must be set".to_string(),
            ));
        }
        if self.dispatch.endpoint_url.trim().is_empty() {
            return Err(SalvorError::Validation(
                "dispatch.endpoint_url must be set".to_string(),
            ));
        }
        if self.dispatch.max_concurrent_dispatches == 0 {
            return Err(SalvorError::Validation(
                "dispatch.max_concurrent_dispatches must be at least 1".to_string(),
            ));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(SalvorError::Validation(
                "dispatch.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
