//! Agent configuration

use anyhow::{Context, Result};
use podscope_core::config::{builder, MonitorConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "PODSCOPE_CONFIG_FILE";

/// Agent configuration: the monitor settings plus the HTTP port
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(flatten)]
    pub monitor: MonitorConfig,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_api_port() -> u16 {
    8080
}

impl AgentConfig {
    /// Load from the file named by `PODSCOPE_CONFIG_FILE`, then the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let config: Self = builder(path)
            .build()
            .context("Failed to read agent configuration")?
            .try_deserialize()
            .context("Invalid agent configuration")?;

        config.monitor.validate()?;
        Ok(config)
    }
}
