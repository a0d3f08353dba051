//! Per-pod status summary

use crate::models::{ContainerStatusView, PodObservation, PodUsageSample};
use serde::Serialize;
use std::collections::HashMap;

/// One line of the pod summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodStatusRow {
    pub pod_name: String,
    pub restart_count: Option<i32>,
    /// Memory usage in GB
    pub memory: Option<f64>,
    /// CPU usage in whole cores
    pub cpu: Option<f64>,
    pub current: Option<ContainerStatusView>,
    pub previous: Option<ContainerStatusView>,
}

/// Join pod observations with their usage samples, in pod name order
pub fn summarize(observations: &[PodObservation], samples: &[PodUsageSample]) -> Vec<PodStatusRow> {
    let usage: HashMap<&str, &PodUsageSample> = samples
        .iter()
        .map(|sample| (sample.pod_name.as_str(), sample))
        .collect();

    let mut rows: Vec<PodStatusRow> = observations
        .iter()
        .map(|pod| {
            let sample = usage.get(pod.name.as_str());
            PodStatusRow {
                pod_name: pod.name.clone(),
                restart_count: pod.restart_count,
                memory: sample.and_then(|s| s.memory).map(|q| q.value()),
                cpu: sample.and_then(|s| s.cpu).map(|q| q.value()),
                current: pod.current.clone(),
                previous: pod.previous.clone(),
            }
        })
        .collect();

    rows.sort_by(|a, b| a.pod_name.cmp(&b.pod_name));
    rows
}
