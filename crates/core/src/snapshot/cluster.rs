//! Snapshot source backed by the Kubernetes API

use super::{async_trait, retain_owned_by, with_timeout, SnapshotSource};
use crate::error::SnapshotError;
use crate::models::{
    ContainerStatusView, DeploymentDescriptor, LifecycleState, OwnerRef, PodObservation,
    PodUsageSample,
};
use crate::quantity::{parse_cpu, parse_cpu_with, parse_memory, BareCpuPolicy, ResourceQuantity};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ContainerState, Pod};
use kube::api::{Api, ListParams, ObjectMeta};
use kube::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default bound on one API call
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    pub usage: ContainerUsage,
}

/// `metrics.k8s.io/v1beta1` pod metrics, which k8s-openapi does not ship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodMetrics {
    pub metadata: ObjectMeta,
    pub containers: Vec<ContainerMetrics>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub window: Option<String>,
}

impl k8s_openapi::Resource for PodMetrics {
    const GROUP: &'static str = "metrics.k8s.io";
    const KIND: &'static str = "PodMetrics";
    const VERSION: &'static str = "v1beta1";
    const API_VERSION: &'static str = "metrics.k8s.io/v1beta1";
    const URL_PATH_SEGMENT: &'static str = "pods";
    type Scope = k8s_openapi::NamespaceResourceScope;
}

impl k8s_openapi::Metadata for PodMetrics {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}

/// [`SnapshotSource`] over a live cluster
#[derive(Clone)]
pub struct KubeSnapshotSource {
    client: Client,
    container_name: Option<String>,
    timeout: Duration,
    bare_cpu: BareCpuPolicy,
}

impl KubeSnapshotSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            container_name: None,
            timeout: DEFAULT_TIMEOUT,
            bare_cpu: BareCpuPolicy::Warn,
        }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn try_default() -> Result<Self, SnapshotError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    /// Only count usage and requests of the named container
    pub fn with_container(mut self, name: Option<String>) -> Self {
        self.container_name = name.filter(|n| !n.is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bare_cpu_policy(mut self, policy: BareCpuPolicy) -> Self {
        self.bare_cpu = policy;
        self
    }
}

#[async_trait]
impl SnapshotSource for KubeSnapshotSource {
    async fn list_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<DeploymentDescriptor>, SnapshotError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = with_timeout(namespace, "deployments", self.timeout, async {
            api.list(&ListParams::default())
                .await
                .map_err(SnapshotError::from)
        })
        .await?;

        let descriptors: Vec<DeploymentDescriptor> = list
            .items
            .iter()
            .filter_map(|d| match descriptor_from(d, self.container_name.as_deref()) {
                Ok(descriptor) => Some(descriptor),
                Err(reason) => {
                    warn!(
                        namespace = %namespace,
                        deployment = d.metadata.name.as_deref().unwrap_or("<unnamed>"),
                        reason = %reason,
                        "Skipping deployment"
                    );
                    None
                }
            })
            .collect();

        debug!(namespace = %namespace, deployments = descriptors.len(), "Listed deployments");
        Ok(descriptors)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        owner: Option<&str>,
    ) -> Result<Vec<PodObservation>, SnapshotError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = with_timeout(namespace, "pods", self.timeout, async {
            api.list(&ListParams::default())
                .await
                .map_err(SnapshotError::from)
        })
        .await?;

        let pods = list.items.iter().map(observation_from).collect();
        Ok(retain_owned_by(pods, owner))
    }

    async fn list_pod_metrics(
        &self,
        namespace: &str,
    ) -> Result<Vec<PodUsageSample>, SnapshotError> {
        let api: Api<PodMetrics> = Api::namespaced(self.client.clone(), namespace);
        let list = with_timeout(namespace, "pod metrics", self.timeout, async {
            api.list(&ListParams::default())
                .await
                .map_err(SnapshotError::from)
        })
        .await?;

        Ok(list
            .items
            .iter()
            .map(|m| usage_from(m, self.container_name.as_deref(), self.bare_cpu))
            .collect())
    }
}

/// Containers whose requests describe the deployment: the named one, or all
/// of them. Usage in [`usage_from`] is taken over the same set.
fn select_containers<'a>(containers: &'a [Container], name: Option<&str>) -> Vec<&'a Container> {
    containers
        .iter()
        .filter(|c| name.map_or(true, |name| c.name == name))
        .collect()
}

/// Parsed cpu and memory requests of one container
fn container_requests(
    container: &Container,
) -> Result<(ResourceQuantity, ResourceQuantity), String> {
    let requests = container
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .ok_or_else(|| format!("container {} has no resource requests", container.name))?;

    let cpu = requests
        .get("cpu")
        .ok_or_else(|| format!("container {} has no cpu request", container.name))?;
    let memory = requests
        .get("memory")
        .ok_or_else(|| format!("container {} has no memory request", container.name))?;

    Ok((
        parse_cpu(&cpu.0).map_err(|e| e.to_string())?,
        parse_memory(&memory.0).map_err(|e| e.to_string())?,
    ))
}

pub(crate) fn descriptor_from(
    deployment: &Deployment,
    container_name: Option<&str>,
) -> Result<DeploymentDescriptor, String> {
    let name = deployment
        .metadata
        .name
        .clone()
        .ok_or_else(|| "deployment has no name".to_string())?;
    let spec = deployment
        .spec
        .as_ref()
        .ok_or_else(|| "deployment has no spec".to_string())?;
    let pod_spec = spec
        .template
        .spec
        .as_ref()
        .ok_or_else(|| "pod template has no spec".to_string())?;

    let mut totals: Option<(ResourceQuantity, ResourceQuantity)> = None;
    for container in select_containers(&pod_spec.containers, container_name) {
        let (cpu, memory) = container_requests(container)?;
        totals = Some(match totals {
            Some((cpu_sum, memory_sum)) => (cpu_sum + cpu, memory_sum + memory),
            None => (cpu, memory),
        });
    }
    let (cpu_request, memory_request) =
        totals.ok_or_else(|| "no matching container in pod template".to_string())?;

    let secret_name = pod_spec
        .volumes
        .as_ref()
        .and_then(|volumes| volumes.first())
        .and_then(|volume| volume.secret.as_ref())
        .and_then(|secret| secret.secret_name.clone());

    Ok(DeploymentDescriptor {
        name,
        replicas: spec.replicas.unwrap_or(1).max(0) as u32,
        cpu_request,
        memory_request,
        secret_name,
    })
}

fn status_view(state: &ContainerState) -> Option<ContainerStatusView> {
    if state.running.is_some() {
        Some(ContainerStatusView::running())
    } else if let Some(terminated) = &state.terminated {
        Some(ContainerStatusView {
            state: LifecycleState::Terminated,
            reason: terminated.reason.clone(),
        })
    } else {
        state.waiting.as_ref().map(|waiting| ContainerStatusView {
            state: LifecycleState::Waiting,
            reason: waiting.reason.clone(),
        })
    }
}

pub(crate) fn observation_from(pod: &Pod) -> PodObservation {
    let meta = &pod.metadata;
    let spec = pod.spec.as_ref();
    let status = pod.status.as_ref();
    let main = status
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.first());

    PodObservation {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        uid: meta.uid.clone(),
        labels: meta.labels.clone().unwrap_or_default(),
        creation_timestamp: meta.creation_timestamp.as_ref().map(|t| t.0),
        deletion_timestamp: meta.deletion_timestamp.as_ref().map(|t| t.0),
        owner_references: meta
            .owner_references
            .iter()
            .flatten()
            .map(|owner| OwnerRef {
                kind: owner.kind.clone(),
                name: owner.name.clone(),
            })
            .collect(),
        node_name: spec.and_then(|s| s.node_name.clone()),
        service_account: spec.and_then(|s| s.service_account_name.clone()),
        scheduler_name: spec.and_then(|s| s.scheduler_name.clone()),
        host_ip: status.and_then(|s| s.host_ip.clone()),
        pod_ip: status.and_then(|s| s.pod_ip.clone()),
        start_time: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
        phase: status.and_then(|s| s.phase.clone()),
        restart_count: main.map(|c| c.restart_count),
        current: main.and_then(|c| c.state.as_ref()).and_then(status_view),
        previous: main.and_then(|c| c.last_state.as_ref()).and_then(status_view),
        qos_class: status.and_then(|s| s.qos_class.clone()),
        message: status.and_then(|s| s.message.clone()),
        reason: status.and_then(|s| s.reason.clone()),
    }
}

/// Sum the parsed readings of the selected containers.
///
/// A reading that fails to parse makes that dimension absent for the pod.
fn sum_usage<'a>(
    pod: &str,
    readings: impl Iterator<Item = &'a str>,
    parse: impl Fn(&str) -> Result<ResourceQuantity, crate::error::ParseError>,
) -> Option<ResourceQuantity> {
    let mut total: Option<ResourceQuantity> = None;
    for reading in readings {
        match parse(reading) {
            Ok(quantity) => {
                total = Some(match total {
                    Some(sum) => sum + quantity,
                    None => quantity,
                })
            }
            Err(e) => {
                warn!(pod = %pod, reading = %reading, error = %e, "Unreadable pod usage");
                return None;
            }
        }
    }
    total
}

pub(crate) fn usage_from(
    metrics: &PodMetrics,
    container_name: Option<&str>,
    bare_cpu: BareCpuPolicy,
) -> PodUsageSample {
    let pod_name = metrics.metadata.name.clone().unwrap_or_default();
    let selected: Vec<&ContainerMetrics> = metrics
        .containers
        .iter()
        .filter(|c| container_name.map_or(true, |name| c.name == name))
        .collect();

    if selected.is_empty() {
        debug!(pod = %pod_name, container = ?container_name, "No matching container in pod metrics");
        return PodUsageSample::absent(pod_name);
    }

    let cpu = sum_usage(
        &pod_name,
        selected.iter().map(|c| c.usage.cpu.as_str()),
        |s| parse_cpu_with(s, bare_cpu),
    );
    let memory = sum_usage(
        &pod_name,
        selected.iter().map(|c| c.usage.memory.as_str()),
        parse_memory,
    );

    PodUsageSample {
        pod_name,
        cpu,
        memory,
        labels: metrics.metadata.labels.clone(),
    }
}
