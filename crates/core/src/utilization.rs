//! Per-deployment utilization statistics
//!
//! Utilization is observed usage expressed as a percentage of the per-replica
//! request. A failure for one deployment is recorded and logged, and the
//! remaining deployments are still reported.

use crate::error::AggregationError;
use crate::models::{DeploymentDescriptor, PodUsageSample};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Utilization statistics for one resource of one deployment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUtilization {
    /// Mean utilization across matched pods (percent)
    pub mean: f64,
    /// Minimum utilization (percent)
    pub min: f64,
    /// Maximum utilization (percent)
    pub max: f64,
    /// Requested quantity per replica (cores or GB)
    pub requested: f64,
    /// Utilization of each matched pod, in pod name order (percent)
    pub samples: Vec<f64>,
}

/// Utilization of one deployment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtilizationReport {
    pub replicas: u32,
    pub memory: ResourceUtilization,
    pub cpu: ResourceUtilization,
    /// Pods without a usage sample, counted as zero in the statistics
    pub missing_samples: Vec<String>,
}

impl UtilizationReport {
    /// Number of pods that contributed to the statistics
    pub fn matched_pods(&self) -> usize {
        self.cpu.samples.len()
    }
}

/// Result of aggregating one snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct UtilizationSummary {
    pub reports: BTreeMap<String, UtilizationReport>,
    #[serde(serialize_with = "serialize_failures")]
    pub failures: Vec<AggregationError>,
}

fn serialize_failures<S: serde::Serializer>(
    failures: &[AggregationError],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(failures.iter().map(|f| f.to_string()))
}

impl UtilizationSummary {
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty() && self.failures.is_empty()
    }
}

/// Compute utilization for every grouped deployment.
///
/// `grouped` maps each deployment to its matched pod samples, as produced by
/// [`crate::matcher::group_by_deployment`].
pub fn aggregate(
    descriptors: &BTreeMap<String, DeploymentDescriptor>,
    grouped: &BTreeMap<String, Vec<PodUsageSample>>,
) -> UtilizationSummary {
    let mut summary = UtilizationSummary::default();

    for (name, samples) in grouped {
        match deployment_utilization(name, descriptors.get(name), samples) {
            Ok(report) => {
                summary.reports.insert(name.clone(), report);
            }
            Err(e) => {
                warn!(
                    deployment = %name,
                    error = %e,
                    "Could not calculate utilization for deployment"
                );
                summary.failures.push(e);
            }
        }
    }

    summary
}

/// Compute the utilization report of a single deployment
pub fn deployment_utilization(
    name: &str,
    descriptor: Option<&DeploymentDescriptor>,
    samples: &[PodUsageSample],
) -> Result<UtilizationReport, AggregationError> {
    let descriptor = descriptor.ok_or_else(|| AggregationError::MissingDescriptor {
        deployment: name.to_string(),
    })?;

    if samples.is_empty() {
        return Err(AggregationError::NoPods {
            deployment: name.to_string(),
        });
    }

    let cpu = resource_utilization(
        name,
        "cpu",
        descriptor.cpu_request.value(),
        samples.iter().map(|s| s.cpu.map(|q| q.value())),
    )?;
    let memory = resource_utilization(
        name,
        "memory",
        descriptor.memory_request.value(),
        samples.iter().map(|s| s.memory.map(|q| q.value())),
    )?;

    let missing_samples = samples
        .iter()
        .filter(|s| s.cpu.is_none() || s.memory.is_none())
        .map(|s| s.pod_name.clone())
        .collect();

    Ok(UtilizationReport {
        replicas: descriptor.replicas,
        memory,
        cpu,
        missing_samples,
    })
}

fn resource_utilization(
    deployment: &str,
    resource: &'static str,
    requested: f64,
    observed: impl Iterator<Item = Option<f64>>,
) -> Result<ResourceUtilization, AggregationError> {
    if !(requested.is_finite() && requested > 0.0) {
        return Err(AggregationError::NonPositiveRequest {
            deployment: deployment.to_string(),
            resource,
            requested,
        });
    }

    let samples: Vec<f64> = observed
        .map(|usage| 100.0 * usage.unwrap_or(0.0) / requested)
        .collect();

    if samples.is_empty() {
        return Err(AggregationError::NoPods {
            deployment: deployment.to_string(),
        });
    }
    if samples.iter().any(|v| !v.is_finite()) {
        return Err(AggregationError::NonFinite {
            deployment: deployment.to_string(),
            resource,
        });
    }

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Ok(ResourceUtilization {
        mean,
        min,
        max,
        requested,
        samples,
    })
}
