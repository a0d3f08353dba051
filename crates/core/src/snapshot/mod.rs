//! Cluster snapshot seam
//!
//! The monitor only ever reads the cluster through [`SnapshotSource`]. The
//! `kube`-backed implementation lives in [`KubeSnapshotSource`]; tests provide
//! their own.

mod cluster;

pub use cluster::{KubeSnapshotSource, PodMetrics};

use crate::error::SnapshotError;
use crate::models::{DeploymentDescriptor, PodObservation, PodUsageSample};
use std::future::Future;
use std::time::Duration;

pub use async_trait::async_trait;

/// Read-only view of the workload state of a namespace
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Deployments with parseable resource requests
    async fn list_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<DeploymentDescriptor>, SnapshotError>;

    /// Pods of the namespace, optionally only those owned by one deployment
    async fn list_pods(
        &self,
        namespace: &str,
        owner: Option<&str>,
    ) -> Result<Vec<PodObservation>, SnapshotError>;

    /// Usage samples for the pods the metrics source knows about
    async fn list_pod_metrics(&self, namespace: &str)
        -> Result<Vec<PodUsageSample>, SnapshotError>;
}

/// Keep the pods owned by `owner`, or all of them when no owner is given
pub fn retain_owned_by(pods: Vec<PodObservation>, owner: Option<&str>) -> Vec<PodObservation> {
    match owner {
        None => pods,
        Some(deployment) => pods
            .into_iter()
            .filter(|pod| pod.owning_deployment() == Some(deployment))
            .collect(),
    }
}

/// Bound a snapshot call by `timeout`
pub async fn with_timeout<T, F>(
    namespace: &str,
    what: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, SnapshotError>
where
    F: Future<Output = Result<T, SnapshotError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(SnapshotError::Timeout {
            namespace: namespace.to_string(),
            what,
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OwnerRef;

    fn pod(name: &str, replicaset: &str) -> PodObservation {
        PodObservation {
            name: name.to_string(),
            owner_references: vec![OwnerRef {
                kind: "ReplicaSet".to_string(),
                name: replicaset.to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_retain_owned_by() {
        let pods = vec![
            pod("web-7d4b9-aaaaa", "web-7d4b9"),
            pod("web-api-5f6c7-bbbbb", "web-api-5f6c7"),
        ];

        let kept = retain_owned_by(pods.clone(), Some("web"));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "web-7d4b9-aaaaa");

        assert_eq!(retain_owned_by(pods, None).len(), 2);
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout("default", "pods", Duration::from_secs(1), async {
            Ok::<_, SnapshotError>(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result = with_timeout("default", "pods", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, SnapshotError>(())
        })
        .await;

        assert!(matches!(
            result,
            Err(SnapshotError::Timeout { what: "pods", .. })
        ));
    }
}
