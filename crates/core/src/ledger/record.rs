//! Persisted pod record

use crate::models::PodObservation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column order of the active table and the archive
pub const COLUMNS: [&str; 18] = [
    "pod_name",
    "uid",
    "creation_timestamp",
    "owner_name",
    "node_name",
    "service_account",
    "scheduler_name",
    "host_ip",
    "pod_ip",
    "start_time",
    "deletion_timestamp",
    "phase",
    "restart_count",
    "state",
    "qos_class",
    "status",
    "message",
    "reason",
];

/// Serialized form of a timestamp: `YYYY-MM-DD HH:MM:SS UTC`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

/// One row of the pod ledger.
///
/// Field order is the column order of the table. Fields up to `start_time`
/// are fixed when the row is inserted, the rest are refreshed every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRecord {
    pub pod_name: String,
    pub uid: Option<String>,
    pub creation_timestamp: Option<String>,
    pub owner_name: Option<String>,
    pub node_name: Option<String>,
    pub service_account: Option<String>,
    pub scheduler_name: Option<String>,
    pub host_ip: Option<String>,
    pub pod_ip: Option<String>,
    pub start_time: Option<String>,

    pub deletion_timestamp: Option<String>,
    pub phase: Option<String>,
    pub restart_count: Option<i32>,
    pub state: Option<String>,
    pub qos_class: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub reason: Option<String>,
}

impl PodRecord {
    /// Build a record from a fresh observation
    pub fn from_observation(pod: &PodObservation) -> Self {
        Self {
            pod_name: pod.name.clone(),
            uid: text(&pod.uid),
            creation_timestamp: pod.creation_timestamp.as_ref().map(format_timestamp),
            owner_name: pod
                .owner_name()
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            node_name: text(&pod.node_name),
            service_account: text(&pod.service_account),
            scheduler_name: text(&pod.scheduler_name),
            host_ip: text(&pod.host_ip),
            pod_ip: text(&pod.pod_ip),
            start_time: pod.start_time.as_ref().map(format_timestamp),
            deletion_timestamp: pod.deletion_timestamp.as_ref().map(format_timestamp),
            phase: text(&pod.phase),
            restart_count: pod.restart_count,
            state: pod.current.as_ref().map(|c| c.state.to_string()),
            qos_class: text(&pod.qos_class),
            status: pod.current.as_ref().and_then(|c| text(&c.reason)),
            message: text(&pod.message),
            reason: text(&pod.reason),
        }
    }

    /// Overwrite the mutable fields with those of a newer observation.
    ///
    /// Returns true when any field changed.
    pub fn refresh_from(&mut self, observed: &PodRecord) -> bool {
        let before = self.clone();

        self.deletion_timestamp = observed.deletion_timestamp.clone();
        self.phase = observed.phase.clone();
        self.restart_count = observed.restart_count;
        self.state = observed.state.clone();
        self.qos_class = observed.qos_class.clone();
        self.status = observed.status.clone();
        self.message = observed.message.clone();
        self.reason = observed.reason.clone();

        *self != before
    }

    /// Identity used to recognise a record already present in the archive.
    ///
    /// `None` without a uid: such a row can never be matched to an earlier one.
    pub fn archive_key(&self) -> Option<(String, String)> {
        self.uid
            .as_ref()
            .map(|uid| (self.pod_name.clone(), uid.clone()))
    }
}

/// Empty strings are stored as nulls so they survive a table round trip
fn text(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}
