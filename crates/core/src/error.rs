//! Error types for podscope.
//!
//! Per-item failures ([`ParseError`], [`AggregationError`]) are absorbed and
//! reported by the component that raised them. Structural failures
//! ([`SnapshotError`], [`LedgerError`]) propagate to the caller through
//! [`MonitorError`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for monitor entry points.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A resource quantity string could not be converted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty quantity string")]
    Empty,

    #[error("malformed numeric prefix in quantity '{input}'")]
    MalformedNumber { input: String },

    #[error("unsupported {dimension} unit '{unit}' in quantity '{input}', supported units: {supported}")]
    UnsupportedUnit {
        dimension: &'static str,
        unit: String,
        input: String,
        supported: String,
    },
}

/// Utilization could not be computed for one deployment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("deployment {deployment} has no matched pods")]
    NoPods { deployment: String },

    #[error("deployment {deployment} has no descriptor in the snapshot")]
    MissingDescriptor { deployment: String },

    #[error("deployment {deployment} requests {requested} {resource}, expected a positive value")]
    NonPositiveRequest {
        deployment: String,
        resource: &'static str,
        requested: f64,
    },

    #[error("deployment {deployment} produced a non-finite {resource} utilization")]
    NonFinite {
        deployment: String,
        resource: &'static str,
    },
}

impl AggregationError {
    /// Name of the deployment this failure belongs to
    pub fn deployment(&self) -> &str {
        match self {
            AggregationError::NoPods { deployment }
            | AggregationError::MissingDescriptor { deployment }
            | AggregationError::NonPositiveRequest { deployment, .. }
            | AggregationError::NonFinite { deployment, .. } => deployment,
        }
    }
}

/// The cluster snapshot could not be obtained.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("cluster API request failed: {0}")]
    Api(#[from] kube::Error),

    #[error("snapshot request for {what} in namespace {namespace} timed out after {timeout:?}")]
    Timeout {
        namespace: String,
        what: &'static str,
        timeout: Duration,
    },

    #[error("no {what} returned for namespace {namespace}")]
    Empty {
        namespace: String,
        what: String,
    },
}

/// The pod ledger could not be read or persisted.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("failed to read ledger table {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write ledger table {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode ledger rows for {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("ledger table {path:?} has header [{found}], expected [{expected}]")]
    SchemaMismatch {
        path: PathBuf,
        found: String,
        expected: String,
    },

    #[error("refusing to reconcile an empty pod snapshot")]
    EmptySnapshot,
}

/// Invalid monitor configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration could not be loaded: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Structural failure of a monitor entry point.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
