//! Configuration management for the CLI
//!
//! Settings are layered: the config file (`--config`, or
//! `~/.config/podscope/config.toml` when present), then `PODSCOPE_*`
//! environment variables, then command-line flags.

use anyhow::{Context, Result};
use podscope_core::config::builder;
use podscope_core::MonitorConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("no namespace given: pass --namespace, set PODSCOPE_NAMESPACE or set `namespace` in {0}")]
    MissingNamespace(String),
}

/// Values given on the command line, each overriding file and environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub namespace: Option<String>,
    pub keep_key: Option<String>,
    pub container_name: Option<String>,
    pub interval_secs: Option<u64>,
    pub ledger_table: Option<PathBuf>,
    pub ledger_archive: Option<PathBuf>,
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".config").join("podscope").join("config.toml"))
}

/// Build and validate the monitor configuration for one invocation
pub fn monitor_config(config_file: Option<&Path>, overrides: Overrides) -> Result<MonitorConfig> {
    let default_path = default_config_path();
    let file = config_file.or(default_path.as_deref());

    let layered = builder(file)
        .set_override_option("namespace", overrides.namespace)?
        .set_override_option("keep_key", overrides.keep_key)?
        .set_override_option("container_name", overrides.container_name)?
        .set_override_option("interval_secs", overrides.interval_secs)?
        .set_override_option("ledger_table", path_value(overrides.ledger_table))?
        .set_override_option("ledger_archive", path_value(overrides.ledger_archive))?
        .build()
        .context("Failed to read configuration")?;

    if layered.get_string("namespace").is_err() {
        let shown = file
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "the config file".to_string());
        return Err(SettingsError::MissingNamespace(shown).into());
    }

    let config: MonitorConfig = layered
        .try_deserialize()
        .context("Invalid configuration")?;
    config.validate()?;
    Ok(config)
}

fn path_value(path: Option<PathBuf>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("podscope.toml");
        std::fs::write(&path, "namespace = \"staging\"\nkeep_key = \"api\"\n").unwrap();

        let config = monitor_config(
            Some(&path),
            Overrides {
                keep_key: Some("worker".to_string()),
                interval_secs: Some(5),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.namespace, "staging");
        assert_eq!(config.keep_key(), Some("worker"));
        assert_eq!(config.interval_secs, 5);
    }

    #[test]
    fn test_ledger_paths_from_flags() {
        let dir = TempDir::new().unwrap();
        let table = dir.path().join("pods.csv");

        let config = monitor_config(
            Some(&dir.path().join("missing.toml")),
            Overrides {
                namespace: Some("default".to_string()),
                ledger_table: Some(table.clone()),
                ..Default::default()
            },
        )
        .unwrap();

        let store = config.ledger_store().unwrap();
        assert_eq!(store.table_path(), table.as_path());
        assert_eq!(store.archive_path(), dir.path().join("pods.archive.csv"));
    }
}
