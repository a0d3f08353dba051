//! Metrics and structured events for the monitor
//!
//! Prometheus metrics live in the default registry and are registered once per
//! process. `StructuredLogger` emits the named events the agent's JSON log is
//! searched by.

use crate::ledger::ReconcileSummary;
use crate::utilization::UtilizationReport;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Cycle latency buckets (seconds); a cycle is dominated by API round trips
const CYCLE_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    cycle_latency_seconds: Histogram,
    cycles_total: IntCounter,
    cycle_failures_total: IntCounter,
    deployments_reported: IntGauge,
    aggregation_failures_total: IntCounter,
    snapshot_failures_total: IntCounter,
    ledger_active_pods: IntGauge,
    ledger_archived_total: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "podscope_cycle_latency_seconds",
                "Time spent in one monitoring cycle",
                CYCLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            cycles_total: register_int_counter!(
                "podscope_cycles_total",
                "Monitoring cycles started"
            )
            .expect("Failed to register cycles_total"),

            cycle_failures_total: register_int_counter!(
                "podscope_cycle_failures_total",
                "Monitoring cycles aborted by a structural failure"
            )
            .expect("Failed to register cycle_failures_total"),

            deployments_reported: register_int_gauge!(
                "podscope_deployments_reported",
                "Deployments with a utilization report in the last cycle"
            )
            .expect("Failed to register deployments_reported"),

            aggregation_failures_total: register_int_counter!(
                "podscope_aggregation_failures_total",
                "Deployments whose utilization could not be computed"
            )
            .expect("Failed to register aggregation_failures_total"),

            snapshot_failures_total: register_int_counter!(
                "podscope_snapshot_failures_total",
                "Failed or timed out cluster snapshot calls"
            )
            .expect("Failed to register snapshot_failures_total"),

            ledger_active_pods: register_int_gauge!(
                "podscope_ledger_active_pods",
                "Rows in the active pod ledger"
            )
            .expect("Failed to register ledger_active_pods"),

            ledger_archived_total: register_int_counter!(
                "podscope_ledger_archived_total",
                "Pods moved to the ledger archive"
            )
            .expect("Failed to register ledger_archived_total"),
        }
    }
}

/// Handle to the process-wide monitor metrics.
///
/// Clones share the same underlying metrics.
#[derive(Clone, Default)]
pub struct MonitorMetrics {
    _private: (),
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn inc_cycles(&self) {
        self.inner().cycles_total.inc();
    }

    pub fn inc_cycle_failures(&self) {
        self.inner().cycle_failures_total.inc();
    }

    pub fn inc_snapshot_failures(&self) {
        self.inner().snapshot_failures_total.inc();
    }

    /// Record the outcome of a utilization pass
    pub fn record_utilization(&self, reported: usize, failed: usize) {
        let inner = self.inner();
        inner.deployments_reported.set(reported as i64);
        inner.aggregation_failures_total.inc_by(failed as u64);
    }

    /// Record the outcome of a ledger reconcile
    pub fn record_reconcile(&self, summary: &ReconcileSummary) {
        let inner = self.inner();
        inner.ledger_active_pods.set(summary.active as i64);
        inner.ledger_archived_total.inc_by(summary.archived.len() as u64);
    }
}

/// Named structured events for the monitor
#[derive(Clone)]
pub struct StructuredLogger {
    namespace: String,
}

impl StructuredLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn log_startup(&self, version: &str, interval_secs: u64, ledger_enabled: bool) {
        info!(
            event = "agent_started",
            namespace = %self.namespace,
            agent_version = %version,
            interval_secs = interval_secs,
            ledger_enabled = ledger_enabled,
            "Podscope agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            namespace = %self.namespace,
            reason = %reason,
            "Podscope agent shutting down"
        );
    }

    /// One line per deployment with its utilization statistics
    pub fn log_utilization(&self, deployment: &str, report: &UtilizationReport) {
        info!(
            event = "deployment_utilization",
            namespace = %self.namespace,
            deployment = %deployment,
            replicas = report.replicas,
            matched_pods = report.matched_pods(),
            cpu_mean_percent = report.cpu.mean,
            cpu_min_percent = report.cpu.min,
            cpu_max_percent = report.cpu.max,
            cpu_request_cores = report.cpu.requested,
            memory_mean_percent = report.memory.mean,
            memory_min_percent = report.memory.min,
            memory_max_percent = report.memory.max,
            memory_request_gb = report.memory.requested,
            missing_samples = report.missing_samples.len(),
            "Deployment utilization"
        );
    }

    pub fn log_utilization_failed(&self, deployment: &str, reason: &str) {
        warn!(
            event = "utilization_failed",
            namespace = %self.namespace,
            deployment = %deployment,
            reason = %reason,
            "Utilization unavailable for deployment"
        );
    }

    pub fn log_reconciled(&self, table: &str, summary: &ReconcileSummary) {
        info!(
            event = "ledger_reconciled",
            namespace = %self.namespace,
            table = %table,
            inserted = summary.inserted.len(),
            updated = summary.updated.len(),
            unchanged = summary.unchanged,
            archived = summary.archived.len(),
            active = summary.active,
            "Pod ledger reconciled"
        );
    }

    pub fn log_cycle_failed(&self, stage: &str, cause: &str) {
        error!(
            event = "cycle_failed",
            namespace = %self.namespace,
            stage = %stage,
            cause = %cause,
            "Monitoring cycle failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_metrics_recording() {
        let metrics = MonitorMetrics::new();

        metrics.inc_cycles();
        metrics.observe_cycle_latency(0.2);
        metrics.record_utilization(3, 1);
        metrics.record_reconcile(&ReconcileSummary {
            archived: vec!["p1".to_string()],
            active: 4,
            ..Default::default()
        });

        let families = prometheus::gather();
        let active = families
            .iter()
            .find(|f| f.get_name() == "podscope_ledger_active_pods")
            .unwrap();
        assert_eq!(active.get_metric()[0].get_gauge().get_value(), 4.0);
    }

    #[test]
    fn test_metrics_handles_share_registration() {
        let a = MonitorMetrics::new();
        let b = a.clone();
        let c = MonitorMetrics::new();

        a.inc_snapshot_failures();
        b.inc_cycle_failures();
        c.inc_cycles();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("staging");
        assert_eq!(logger.namespace, "staging");
    }
}
