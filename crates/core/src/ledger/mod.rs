//! Pod lifecycle ledger
//!
//! Keeps a CSV table of the pods currently observed and an append-only archive
//! of the pods that went away. Each reconcile:
//!
//! 1. loads the active table
//! 2. archives rows whose pod is no longer observed
//! 3. refreshes the mutable fields of rows still observed
//! 4. inserts rows for newly observed pods
//! 5. rewrites the active table in one piece
//!
//! Rows are written in pod name order, so reconciling the same snapshot twice
//! leaves an identical table.

mod record;
mod store;


pub use record::{format_timestamp, PodRecord, COLUMNS};
pub use store::{default_archive_path, LedgerStore};

use crate::error::LedgerError;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Outcome of one reconcile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Pods inserted this cycle
    pub inserted: Vec<String>,
    /// Continuing pods whose mutable fields changed
    pub updated: Vec<String>,
    /// Continuing pods with no change
    pub unchanged: usize,
    /// Pods moved to the archive
    pub archived: Vec<String>,
    /// Rows in the active table after the reconcile
    pub active: usize,
}

/// The pieces of a reconcile before anything is written
#[derive(Debug, Default)]
struct ReconcilePlan {
    active: BTreeMap<String, PodRecord>,
    departed: Vec<PodRecord>,
    summary: ReconcileSummary,
}

/// Reconciliation engine over a [`LedgerStore`]
#[derive(Debug, Clone)]
pub struct PodLedger {
    store: LedgerStore,
}

impl PodLedger {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Merge the observed pods into the persisted table.
    ///
    /// An empty snapshot is rejected: it cannot be told apart from an
    /// unreachable cluster, and accepting it would archive every pod.
    pub fn reconcile(&self, snapshot: &[PodRecord]) -> Result<ReconcileSummary, LedgerError> {
        if snapshot.is_empty() {
            return Err(LedgerError::EmptySnapshot);
        }

        let stored = self.store.load_active()?;
        let plan = plan(stored, snapshot);

        // Archive before rewriting the table so an interrupted cycle never loses a row
        if !plan.departed.is_empty() {
            let already_archived = self.store.archived_among(&plan.departed)?;
            let (skipped, pending): (Vec<_>, Vec<_>) =
                plan.departed.iter().cloned().partition(|r| {
                    r.archive_key()
                        .map_or(false, |key| already_archived.contains(&key))
                });

            if !skipped.is_empty() {
                warn!(
                    pods = skipped.len(),
                    "Departed pods already archived by an interrupted cycle"
                );
            }
            self.store.append_archive(&pending)?;
        }

        let rows: Vec<PodRecord> = plan.active.into_values().collect();
        self.store.write_active(&rows)?;

        let summary = plan.summary;
        info!(
            inserted = summary.inserted.len(),
            updated = summary.updated.len(),
            unchanged = summary.unchanged,
            archived = summary.archived.len(),
            active = summary.active,
            table = %self.store.table_path().display(),
            "Pod ledger reconciled"
        );

        Ok(summary)
    }
}

/// Classify stored and observed rows into the next table image
fn plan(stored: Vec<PodRecord>, snapshot: &[PodRecord]) -> ReconcilePlan {
    let mut observed: BTreeMap<&str, &PodRecord> = BTreeMap::new();
    for record in snapshot {
        if observed.insert(record.pod_name.as_str(), record).is_some() {
            warn!(pod = %record.pod_name, "Pod observed twice in one snapshot, keeping the last");
        }
    }

    let mut plan = ReconcilePlan::default();

    for mut record in stored {
        match observed.remove(record.pod_name.as_str()) {
            Some(fresh) => {
                if record.refresh_from(fresh) {
                    plan.summary.updated.push(record.pod_name.clone());
                } else {
                    plan.summary.unchanged += 1;
                }
                plan.active.insert(record.pod_name.clone(), record);
            }
            None => {
                debug!(pod = %record.pod_name, "Pod departed");
                plan.summary.archived.push(record.pod_name.clone());
                plan.departed.push(record);
            }
        }
    }

    for (name, fresh) in observed {
        plan.summary.inserted.push(name.to_string());
        plan.active.insert(name.to_string(), fresh.clone());
    }

    plan.summary.active = plan.active.len();
    plan
}
