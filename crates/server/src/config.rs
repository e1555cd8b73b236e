//! Server configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use serving_lib::ServingConfig;
use std::collections::HashMap;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "DAIRY_AI_CONFIG";

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Port for the prediction, health and metrics API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Model artifacts and batch scheduling
    #[serde(default)]
    pub serving: ServingConfig,
}

fn default_api_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            serving: ServingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `DAIRY_AI__*` environment variables, layered
    /// over the file named by `DAIRY_AI_CONFIG` if set
    pub fn load() -> Result<Self> {
        Self::from_sources(std::env::var(CONFIG_FILE_ENV).ok().as_deref(), None)
    }

    /// `env` replaces the process environment when given
    pub fn from_sources(file: Option<&str>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("DAIRY_AI")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid server configuration")
    }
}
