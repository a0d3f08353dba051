//! Core data models for a cluster snapshot

use crate::quantity::ResourceQuantity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Requested resources of one deployment, rebuilt on every poll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentDescriptor {
    pub name: String,
    pub replicas: u32,
    /// CPU request per replica, in whole cores
    pub cpu_request: ResourceQuantity,
    /// Memory request per replica, in gigabytes
    pub memory_request: ResourceQuantity,
    pub secret_name: Option<String>,
}

/// Observed resource usage of one pod.
///
/// `None` means the metrics source had nothing for the pod, which is not the
/// same as a zero reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodUsageSample {
    pub pod_name: String,
    pub cpu: Option<ResourceQuantity>,
    pub memory: Option<ResourceQuantity>,
    pub labels: Option<BTreeMap<String, String>>,
}

impl PodUsageSample {
    /// A pod present in the cluster but absent from the metrics source
    pub fn absent(pod_name: impl Into<String>) -> Self {
        Self {
            pod_name: pod_name.into(),
            cpu: None,
            memory: None,
            labels: None,
        }
    }

    /// True when neither CPU nor memory usage was reported
    pub fn is_absent(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none()
    }

    /// True when both readings are present and zero
    pub fn is_idle(&self) -> bool {
        matches!((self.cpu, self.memory), (Some(cpu), Some(mem)) if cpu.value() == 0.0 && mem.value() == 0.0)
    }
}

/// Lifecycle state of a pod's main container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Running,
    Waiting,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Running => "running",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// State of the main container plus the reason reported for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatusView {
    pub state: LifecycleState,
    pub reason: Option<String>,
}

impl ContainerStatusView {
    pub fn running() -> Self {
        Self {
            state: LifecycleState::Running,
            reason: Some("Running".to_string()),
        }
    }
}

/// Controller that owns a pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

/// Point-in-time view of a pod as returned by the snapshot source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodObservation {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub owner_references: Vec<OwnerRef>,
    pub node_name: Option<String>,
    pub service_account: Option<String>,
    pub scheduler_name: Option<String>,
    pub host_ip: Option<String>,
    pub pod_ip: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub phase: Option<String>,
    pub restart_count: Option<i32>,
    /// Current state of the main container
    pub current: Option<ContainerStatusView>,
    /// Last terminated state of the main container
    pub previous: Option<ContainerStatusView>,
    pub qos_class: Option<String>,
    pub message: Option<String>,
    pub reason: Option<String>,
}

impl PodObservation {
    /// Name of the first owning controller
    pub fn owner_name(&self) -> Option<&str> {
        self.owner_references.first().map(|owner| owner.name.as_str())
    }

    /// Deployment that owns this pod through its ReplicaSet.
    ///
    /// Every owner must be a ReplicaSet named `<deployment>-<hash>` for the
    /// same deployment.
    pub fn owning_deployment(&self) -> Option<&str> {
        let mut deployment = None;
        for owner in &self.owner_references {
            if owner.kind != "ReplicaSet" {
                return None;
            }
            let stem = owner.name.rsplit_once('-').map(|(stem, _)| stem)?;
            match deployment {
                None => deployment = Some(stem),
                Some(existing) if existing == stem => {}
                Some(_) => return None,
            }
        }
        deployment
    }
}
