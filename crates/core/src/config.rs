//! Monitor configuration

use crate::error::ConfigError;
use crate::ledger::{default_archive_path, LedgerStore};
use crate::quantity::BareCpuPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix for every setting, e.g. `PODSCOPE_NAMESPACE`
pub const ENV_PREFIX: &str = "PODSCOPE";

/// Settings shared by the agent and the CLI
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MonitorConfig {
    /// Namespace to observe
    pub namespace: String,

    /// Only deployments whose name contains this string are reported
    #[serde(default)]
    pub keep_key: Option<String>,

    /// Metrics container to count; all containers are summed when unset
    #[serde(default)]
    pub container_name: Option<String>,

    /// Poll period in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Bound on each call to the cluster API, in seconds
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_secs: u64,

    /// Active pod ledger table; the ledger is disabled when unset
    #[serde(default)]
    pub ledger_table: Option<PathBuf>,

    /// Ledger archive, `<table>.archive.csv` when unset
    #[serde(default)]
    pub ledger_archive: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub warn_bare_cpu: bool,

    #[serde(default = "default_true")]
    pub warn_zero_usage: bool,

    /// Stop polling after the first structural failure
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_interval() -> u64 {
    20
}

fn default_snapshot_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl MonitorConfig {
    /// Defaults for `namespace`
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            keep_key: None,
            container_name: None,
            interval_secs: default_interval(),
            snapshot_timeout_secs: default_snapshot_timeout(),
            ledger_table: None,
            ledger_archive: None,
            warn_bare_cpu: true,
            warn_zero_usage: true,
            fail_fast: false,
        }
    }

    /// Load from an optional file, then `PODSCOPE_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = builder(path).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval_secs must be positive".to_string()));
        }
        if self.snapshot_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "snapshot_timeout_secs must be positive".to_string(),
            ));
        }
        if let Some(store) = self.ledger_store() {
            if store.table_path() == store.archive_path() {
                return Err(ConfigError::Invalid(format!(
                    "ledger table and archive are the same file: {}",
                    store.table_path().display()
                )));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_secs)
    }

    pub fn keep_key(&self) -> Option<&str> {
        self.keep_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn bare_cpu_policy(&self) -> BareCpuPolicy {
        if self.warn_bare_cpu {
            BareCpuPolicy::Warn
        } else {
            BareCpuPolicy::Allow
        }
    }

    /// Ledger location, if the ledger is enabled
    pub fn ledger_store(&self) -> Option<LedgerStore> {
        let table = self.ledger_table.as_ref()?;
        let archive = self
            .ledger_archive
            .clone()
            .unwrap_or_else(|| default_archive_path(table));
        Some(LedgerStore::new(table.clone(), archive))
    }
}

/// Layered sources shared with the agent's own configuration
pub fn builder(path: Option<&Path>) -> config::ConfigBuilder<config::builder::DefaultState> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(false));
    }
    builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::for_namespace("default");

        assert_eq!(config.interval(), Duration::from_secs(20));
        assert_eq!(config.snapshot_timeout(), Duration::from_secs(30));
        assert_eq!(config.bare_cpu_policy(), BareCpuPolicy::Warn);
        assert!(config.ledger_store().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("podscope.toml");
        std::fs::write(
            &path,
            "namespace = \"staging\"\n\
             keep_key = \"worker\"\n\
             interval_secs = 5\n\
             ledger_table = \"/var/lib/podscope/pods.csv\"\n\
             warn_bare_cpu = false\n",
        )
        .unwrap();

        let config = MonitorConfig::load(Some(&path)).unwrap();

        assert_eq!(config.namespace, "staging");
        assert_eq!(config.keep_key(), Some("worker"));
        assert_eq!(config.interval_secs, 5);
        assert_eq!(config.snapshot_timeout_secs, 30);
        assert_eq!(config.bare_cpu_policy(), BareCpuPolicy::Allow);

        let store = config.ledger_store().unwrap();
        assert_eq!(
            store.archive_path(),
            Path::new("/var/lib/podscope/pods.archive.csv")
        );
    }

    #[test]
    fn test_validation_failures() {
        let mut config = MonitorConfig::for_namespace("  ");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.namespace = "default".to_string();
        config.interval_secs = 0;
        assert!(config.validate().is_err());

        config.interval_secs = 20;
        config.snapshot_timeout_secs = 0;
        assert!(config.validate().is_err());

        config.snapshot_timeout_secs = 30;
        config.ledger_table = Some(PathBuf::from("pods.csv"));
        config.ledger_archive = Some(PathBuf::from("pods.csv"));
        assert!(config.validate().is_err());

        config.ledger_archive = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_keep_key_means_no_filter() {
        let mut config = MonitorConfig::for_namespace("default");
        config.keep_key = Some(String::new());
        assert_eq!(config.keep_key(), None);
    }
}
