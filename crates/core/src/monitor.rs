//! Monitor entry points
//!
//! [`compute_utilization`] and [`reconcile_pod_ledger`] each take one snapshot
//! and run one path of the pipeline. [`MonitorCycle`] runs both on every
//! poller tick and reports the outcome to health, metrics and the event log.

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result, SnapshotError};
use crate::health::{components, HealthRegistry};
use crate::ledger::{LedgerStore, PodLedger, PodRecord, ReconcileSummary};
use crate::matcher::group_by_deployment;
use crate::models::{DeploymentDescriptor, PodUsageSample};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::poller::CycleTask;
use crate::snapshot::SnapshotSource;
use crate::utilization::{aggregate, UtilizationSummary};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Knobs for the utilization path
#[derive(Debug, Clone, Copy)]
pub struct UtilizationOptions {
    /// Warn about pods reporting zero CPU and zero memory
    pub warn_zero_usage: bool,
}

impl Default for UtilizationOptions {
    fn default() -> Self {
        Self {
            warn_zero_usage: true,
        }
    }
}

impl From<&MonitorConfig> for UtilizationOptions {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            warn_zero_usage: config.warn_zero_usage,
        }
    }
}

/// Utilization of every deployment in `namespace` whose name contains `keep_key`.
///
/// Pods known to the cluster but missing from the metrics source are kept as
/// absent samples.
pub async fn compute_utilization(
    source: &dyn SnapshotSource,
    namespace: &str,
    keep_key: Option<&str>,
    options: UtilizationOptions,
) -> Result<UtilizationSummary> {
    let deployments = source.list_deployments(namespace).await?;
    if deployments.is_empty() {
        return Err(SnapshotError::Empty {
            namespace: namespace.to_string(),
            what: "deployments".to_string(),
        }
        .into());
    }

    let pods = source.list_pods(namespace, None).await?;
    let metrics = source.list_pod_metrics(namespace).await?;

    let mut samples: BTreeMap<String, PodUsageSample> = pods
        .into_iter()
        .map(|pod| {
            let sample = PodUsageSample::absent(pod.name.clone());
            (pod.name, sample)
        })
        .collect();

    for sample in metrics {
        if options.warn_zero_usage && sample.is_idle() {
            warn!(pod = %sample.pod_name, "Pod is using zero resources");
        }
        samples.insert(sample.pod_name.clone(), sample);
    }

    let names: Vec<String> = deployments.iter().map(|d| d.name.clone()).collect();
    let descriptors: BTreeMap<String, DeploymentDescriptor> = deployments
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect();

    let grouped: BTreeMap<String, Vec<PodUsageSample>> =
        group_by_deployment(samples, &names, keep_key)
            .into_iter()
            .map(|(deployment, pods)| (deployment, pods.into_values().collect()))
            .collect();

    debug!(
        namespace = %namespace,
        deployments = grouped.len(),
        "Aggregating deployment utilization"
    );

    Ok(aggregate(&descriptors, &grouped))
}

/// Reconcile the ledger in `store` with the pods of `namespace`.
///
/// With `keep_key`, only pods owned by a deployment whose name contains it are
/// recorded.
pub async fn reconcile_pod_ledger(
    source: &dyn SnapshotSource,
    store: &LedgerStore,
    namespace: &str,
    keep_key: Option<&str>,
) -> Result<ReconcileSummary> {
    let pods = source.list_pods(namespace, None).await?;

    let records: Vec<PodRecord> = pods
        .iter()
        .filter(|pod| match keep_key {
            None => true,
            Some(key) => pod
                .owning_deployment()
                .map_or(false, |deployment| deployment.contains(key)),
        })
        .map(PodRecord::from_observation)
        .collect();

    if records.is_empty() {
        return Err(SnapshotError::Empty {
            namespace: namespace.to_string(),
            what: match keep_key {
                Some(key) => format!("pods owned by deployments matching '{key}'"),
                None => "pods".to_string(),
            },
        }
        .into());
    }

    let ledger = PodLedger::new(store.clone());
    Ok(ledger.reconcile(&records)?)
}

/// One monitoring cycle: utilization, then the ledger if one is configured
pub struct MonitorCycle {
    source: Arc<dyn SnapshotSource>,
    config: MonitorConfig,
    ledger: Option<LedgerStore>,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl MonitorCycle {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        config: MonitorConfig,
        health: HealthRegistry,
        metrics: MonitorMetrics,
    ) -> Self {
        let ledger = config.ledger_store();
        let logger = StructuredLogger::new(&config.namespace);
        Self {
            source,
            config,
            ledger,
            health,
            metrics,
            logger,
        }
    }

    async fn utilization_stage(&self) -> Result<()> {
        let summary = compute_utilization(
            self.source.as_ref(),
            &self.config.namespace,
            self.config.keep_key(),
            UtilizationOptions::from(&self.config),
        )
        .await?;

        for (deployment, report) in &summary.reports {
            self.logger.log_utilization(deployment, report);
        }
        for failure in &summary.failures {
            self.logger
                .log_utilization_failed(failure.deployment(), &failure.to_string());
        }
        self.metrics
            .record_utilization(summary.reports.len(), summary.failures.len());

        if summary.failures.is_empty() {
            self.health.set_healthy(components::UTILIZATION).await;
        } else {
            self.health
                .set_degraded(
                    components::UTILIZATION,
                    format!("{} deployments without utilization", summary.failures.len()),
                )
                .await;
        }
        Ok(())
    }

    async fn ledger_stage(&self, store: &LedgerStore) -> Result<()> {
        let summary = reconcile_pod_ledger(
            self.source.as_ref(),
            store,
            &self.config.namespace,
            self.config.keep_key(),
        )
        .await?;

        self.logger
            .log_reconciled(&store.table_path().display().to_string(), &summary);
        self.metrics.record_reconcile(&summary);
        self.health.set_healthy(components::LEDGER).await;
        Ok(())
    }

    /// Report a failed stage to health and metrics
    async fn record_failure(&self, stage: &str, error: &MonitorError) {
        self.logger.log_cycle_failed(stage, &error.to_string());
        match error {
            MonitorError::Snapshot(_) => {
                self.metrics.inc_snapshot_failures();
                self.health
                    .set_unhealthy(components::SNAPSHOT, error.to_string())
                    .await;
            }
            MonitorError::Ledger(_) => {
                self.health
                    .set_unhealthy(components::LEDGER, error.to_string())
                    .await;
            }
        }
    }
}

#[async_trait]
impl CycleTask for MonitorCycle {
    async fn run_cycle(&self) -> Result<()> {
        let start = Instant::now();
        self.metrics.inc_cycles();

        let mut first_error = None;
        let mut snapshot_failed = false;

        if let Err(e) = self.utilization_stage().await {
            snapshot_failed |= matches!(e, MonitorError::Snapshot(_));
            self.record_failure("utilization", &e).await;
            first_error = Some(e);
        }

        if let Some(store) = &self.ledger {
            if let Err(e) = self.ledger_stage(store).await {
                snapshot_failed |= matches!(e, MonitorError::Snapshot(_));
                self.record_failure("ledger", &e).await;
                first_error.get_or_insert(e);
            }
        }

        // Snapshot health covers every snapshot taken this cycle
        if !snapshot_failed {
            self.health.set_healthy(components::SNAPSHOT).await;
        }

        self.health.record_cycle(chrono::Utc::now()).await;
        self.metrics
            .observe_cycle_latency(start.elapsed().as_secs_f64());

        match first_error {
            Some(e) => {
                self.metrics.inc_cycle_failures();
                Err(e)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::health::ComponentStatus;
    use crate::models::{OwnerRef, PodObservation};
    use crate::quantity::ResourceQuantity;
    use crate::snapshot::retain_owned_by;
    use tempfile::TempDir;

    /// Snapshot source serving fixed data
    #[derive(Default)]
    struct MockSource {
        deployments: Vec<DeploymentDescriptor>,
        pods: Vec<PodObservation>,
        metrics: Vec<PodUsageSample>,
    }

    impl MockSource {
        fn deployment(mut self, name: &str, cpu: f64, memory: f64) -> Self {
            self.deployments.push(DeploymentDescriptor {
                name: name.to_string(),
                replicas: 1,
                cpu_request: ResourceQuantity::cores(cpu),
                memory_request: ResourceQuantity::gigabytes(memory),
                secret_name: None,
            });
            self
        }

        fn pod(mut self, name: &str, usage: Option<(f64, f64)>) -> Self {
            let replicaset = name.rsplit_once('-').map(|(rs, _)| rs).unwrap_or(name);
            self.pods.push(PodObservation {
                name: name.to_string(),
                namespace: "default".to_string(),
                uid: Some(format!("{name}-uid")),
                owner_references: vec![OwnerRef {
                    kind: "ReplicaSet".to_string(),
                    name: replicaset.to_string(),
                }],
                phase: Some("Running".to_string()),
                restart_count: Some(0),
                ..Default::default()
            });
            if let Some((cpu, memory)) = usage {
                self.metrics.push(PodUsageSample {
                    pod_name: name.to_string(),
                    cpu: Some(ResourceQuantity::cores(cpu)),
                    memory: Some(ResourceQuantity::gigabytes(memory)),
                    labels: None,
                });
            }
            self
        }
    }

    #[async_trait]
    impl SnapshotSource for MockSource {
        async fn list_deployments(
            &self,
            _namespace: &str,
        ) -> std::result::Result<Vec<DeploymentDescriptor>, SnapshotError> {
            Ok(self.deployments.clone())
        }

        async fn list_pods(
            &self,
            _namespace: &str,
            owner: Option<&str>,
        ) -> std::result::Result<Vec<PodObservation>, SnapshotError> {
            Ok(retain_owned_by(self.pods.clone(), owner))
        }

        async fn list_pod_metrics(
            &self,
            _namespace: &str,
        ) -> std::result::Result<Vec<PodUsageSample>, SnapshotError> {
            Ok(self.metrics.clone())
        }
    }

    #[tokio::test]
    async fn test_end_to_end_utilization() {
        let source = MockSource::default()
            .deployment("a", 1.0, 1.0)
            .pod("a-x-y", Some((0.5, 0.5)));

        let summary = compute_utilization(&source, "default", None, UtilizationOptions::default())
            .await
            .unwrap();

        let report = &summary.reports["a"];
        assert_eq!(report.cpu.mean, 50.0);
        assert_eq!(report.memory.mean, 50.0);
        assert!(summary.failures.is_empty());
    }

    #[tokio::test]
    async fn test_zero_usage_warning_is_opt_in() {
        let source = MockSource::default()
            .deployment("a", 1.0, 1.0)
            .pod("a-x-y", Some((0.0, 0.0)))
            .pod("a-x-z", Some((0.5, 0.5)));

        let logs = crate::testing::CapturedLogs::default();
        let _guard = logs.install();

        let quiet = UtilizationOptions {
            warn_zero_usage: false,
        };
        compute_utilization(&source, "default", None, quiet)
            .await
            .unwrap();
        assert!(!logs.contents().contains("zero resources"));

        let summary = compute_utilization(&source, "default", None, UtilizationOptions::default())
            .await
            .unwrap();
        let contents = logs.contents();
        assert!(contents.contains("Pod is using zero resources"), "{contents}");
        assert!(contents.contains("a-x-y"), "{contents}");
        assert!(!contents.contains("a-x-z"), "{contents}");
        assert_eq!(summary.reports["a"].cpu.min, 0.0);
    }

    #[tokio::test]
    async fn test_pod_without_metrics_is_absent() {
        let source = MockSource::default()
            .deployment("web", 2.0, 2.0)
            .pod("web-a-1", Some((1.0, 1.0)))
            .pod("web-a-2", None);

        let summary = compute_utilization(&source, "default", None, UtilizationOptions::default())
            .await
            .unwrap();

        let report = &summary.reports["web"];
        assert_eq!(report.cpu.samples, vec![50.0, 0.0]);
        assert_eq!(report.missing_samples, vec!["web-a-2".to_string()]);
    }

    #[tokio::test]
    async fn test_longest_deployment_name_wins() {
        let source = MockSource::default()
            .deployment("svc", 1.0, 1.0)
            .deployment("svc-extra", 1.0, 1.0)
            .pod("svc-abc12-xy789", Some((0.1, 0.1)))
            .pod("svc-extra-abc12-xy789", Some((0.9, 0.9)));

        let summary = compute_utilization(&source, "default", None, UtilizationOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.reports["svc"].cpu.samples.len(), 1);
        assert_eq!(summary.reports["svc-extra"].cpu.mean, 90.0);
    }

    #[tokio::test]
    async fn test_keep_key_filters_deployments() {
        let source = MockSource::default()
            .deployment("api", 1.0, 1.0)
            .deployment("worker", 1.0, 1.0)
            .pod("api-a-1", Some((0.5, 0.5)))
            .pod("worker-b-1", Some((0.5, 0.5)));

        let summary = compute_utilization(
            &source,
            "default",
            Some("work"),
            UtilizationOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.reports.keys().collect::<Vec<_>>(), vec!["worker"]);
    }

    #[tokio::test]
    async fn test_no_deployments_is_an_error() {
        let source = MockSource::default();

        let result =
            compute_utilization(&source, "default", None, UtilizationOptions::default()).await;

        assert!(matches!(
            result,
            Err(MonitorError::Snapshot(SnapshotError::Empty { .. }))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_pod_ledger_filters_by_owner() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::beside(dir.path().join("pods.csv"));
        let source = MockSource::default()
            .pod("api-a-1", None)
            .pod("worker-b-1", None);

        let summary = reconcile_pod_ledger(&source, &store, "default", Some("work"))
            .await
            .unwrap();

        assert_eq!(summary.inserted, vec!["worker-b-1".to_string()]);
        let rows = store.load_active().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].owner_name.as_deref(), Some("worker-b"));
    }

    #[tokio::test]
    async fn test_reconcile_pod_ledger_refuses_empty_filtered_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::beside(dir.path().join("pods.csv"));
        let source = MockSource::default().pod("api-a-1", None);

        let result = reconcile_pod_ledger(&source, &store, "default", Some("nothing")).await;

        assert!(matches!(
            result,
            Err(MonitorError::Snapshot(SnapshotError::Empty { .. }))
        ));
        assert!(!store.table_path().exists());
    }

    #[tokio::test]
    async fn test_monitor_cycle_updates_health_and_ledger() {
        let dir = TempDir::new().unwrap();
        let mut config = MonitorConfig::for_namespace("default");
        config.ledger_table = Some(dir.path().join("pods.csv"));

        let source = MockSource::default()
            .deployment("a", 1.0, 1.0)
            .pod("a-x-y", Some((0.5, 0.5)));
        let health = HealthRegistry::new();
        let cycle = MonitorCycle::new(
            Arc::new(source),
            config,
            health.clone(),
            MonitorMetrics::new(),
        );

        cycle.run_cycle().await.unwrap();

        let status = health.health().await;
        assert_eq!(status.status, ComponentStatus::Healthy);
        assert!(status.last_cycle.is_some());
        assert!(health.readiness().await.ready);
        assert_eq!(
            LedgerStore::beside(dir.path().join("pods.csv"))
                .load_active()
                .unwrap()
                .len(),
            1
        );
    }

    /// Serves `inner`, failing the second pod listing of each cycle and
    /// recording the snapshot health seen at that moment
    struct LedgerListingFails {
        inner: MockSource,
        health: HealthRegistry,
        pod_calls: std::sync::atomic::AtomicUsize,
        seen: std::sync::Mutex<Vec<ComponentStatus>>,
    }

    #[async_trait]
    impl SnapshotSource for LedgerListingFails {
        async fn list_deployments(
            &self,
            namespace: &str,
        ) -> std::result::Result<Vec<DeploymentDescriptor>, SnapshotError> {
            self.inner.list_deployments(namespace).await
        }

        async fn list_pods(
            &self,
            namespace: &str,
            owner: Option<&str>,
        ) -> std::result::Result<Vec<PodObservation>, SnapshotError> {
            let call = self
                .pod_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call % 2 == 0 {
                return self.inner.list_pods(namespace, owner).await;
            }

            let status = self.health.health().await.components[components::SNAPSHOT].status;
            self.seen.lock().unwrap().push(status);
            Err(SnapshotError::Timeout {
                namespace: namespace.to_string(),
                what: "pods",
                timeout: std::time::Duration::from_secs(30),
            })
        }

        async fn list_pod_metrics(
            &self,
            namespace: &str,
        ) -> std::result::Result<Vec<PodUsageSample>, SnapshotError> {
            self.inner.list_pod_metrics(namespace).await
        }
    }

    #[tokio::test]
    async fn test_snapshot_stays_unhealthy_until_every_stage_succeeds() {
        let dir = TempDir::new().unwrap();
        let mut config = MonitorConfig::for_namespace("default");
        config.ledger_table = Some(dir.path().join("pods.csv"));

        let health = HealthRegistry::new();
        health.register(components::SNAPSHOT).await;
        health
            .set_unhealthy(components::SNAPSHOT, "pods request timed out")
            .await;

        let source = Arc::new(LedgerListingFails {
            inner: MockSource::default()
                .deployment("a", 1.0, 1.0)
                .pod("a-x-y", Some((0.5, 0.5))),
            health: health.clone(),
            pod_calls: Default::default(),
            seen: Default::default(),
        });
        let cycle = MonitorCycle::new(
            source.clone(),
            config,
            health.clone(),
            MonitorMetrics::new(),
        );

        let result = cycle.run_cycle().await;

        assert!(matches!(result, Err(MonitorError::Snapshot(_))));
        assert_eq!(
            *source.seen.lock().unwrap(),
            vec![ComponentStatus::Unhealthy]
        );
        let status = health.health().await;
        assert_eq!(
            status.components[components::SNAPSHOT].status,
            ComponentStatus::Unhealthy
        );
        assert_eq!(
            status.components[components::UTILIZATION].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_monitor_cycle_reports_ledger_failure() {
        let dir = TempDir::new().unwrap();
        let table = dir.path().join("pods.csv");
        std::fs::write(&table, "not,the,right,header\n").unwrap();

        let mut config = MonitorConfig::for_namespace("default");
        config.ledger_table = Some(table);

        let source = MockSource::default()
            .deployment("a", 1.0, 1.0)
            .pod("a-x-y", Some((0.5, 0.5)));
        let health = HealthRegistry::new();
        let cycle = MonitorCycle::new(
            Arc::new(source),
            config,
            health.clone(),
            MonitorMetrics::new(),
        );

        let result = cycle.run_cycle().await;

        assert!(matches!(
            result,
            Err(MonitorError::Ledger(LedgerError::SchemaMismatch { .. }))
        ));
        let status = health.health().await;
        assert_eq!(
            status.components[components::LEDGER].status,
            ComponentStatus::Unhealthy
        );
        assert_eq!(
            status.components[components::UTILIZATION].status,
            ComponentStatus::Healthy
        );
    }
}
