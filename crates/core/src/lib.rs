//! Core library for namespace workload monitoring
//!
//! This crate provides:
//! - Resource quantity parsing into whole cores and gigabytes
//! - Pod to deployment matching and per-deployment utilization statistics
//! - A CSV pod lifecycle ledger with an append-only archive
//! - The fixed-interval poller, health checks and observability

pub mod config;
pub mod error;
pub mod health;
pub mod ledger;
pub mod matcher;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod pods;
pub mod poller;
pub mod quantity;
pub mod snapshot;
pub mod utilization;

#[cfg(test)]
mod testing;

pub use config::MonitorConfig;
pub use error::{
    AggregationError, ConfigError, LedgerError, MonitorError, ParseError, SnapshotError,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use ledger::{LedgerStore, PodLedger, PodRecord, ReconcileSummary};
pub use models::*;
pub use monitor::{compute_utilization, reconcile_pod_ledger, MonitorCycle, UtilizationOptions};
pub use observability::{MonitorMetrics, StructuredLogger};
pub use poller::{CycleTask, Poller, PollerBuilder, PollerConfig, PollerStats};
pub use quantity::{parse_cpu, parse_cpu_with, parse_memory, BareCpuPolicy, ResourceQuantity};
pub use snapshot::{KubeSnapshotSource, SnapshotSource};
pub use utilization::{UtilizationReport, UtilizationSummary};
