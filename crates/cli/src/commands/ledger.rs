//! `podscope ledger reconcile` and `podscope ledger show`

use anyhow::{Context, Result};
use async_trait::async_trait;
use podscope_core::{
    reconcile_pod_ledger, CycleTask, LedgerStore, MonitorConfig, MonitorError, PodRecord,
    ReconcileSummary, SnapshotSource,
};
use std::sync::Arc;
use tabled::Tabled;

use crate::output::{
    color_status, format_optional, print_info, print_json, print_rows, print_success,
    OutputFormat,
};

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Pod")]
    pod_name: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Restarts")]
    restarts: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Deleted")]
    deleted: String,
}

impl From<&PodRecord> for RecordRow {
    fn from(record: &PodRecord) -> Self {
        Self {
            pod_name: record.pod_name.clone(),
            owner: format_optional(record.owner_name.as_deref()),
            node: format_optional(record.node_name.as_deref()),
            phase: record
                .phase
                .as_deref()
                .map(color_status)
                .unwrap_or_else(|| "-".to_string()),
            restarts: format_optional(record.restart_count),
            state: record
                .state
                .as_deref()
                .map(color_status)
                .unwrap_or_else(|| "-".to_string()),
            started: format_optional(record.start_time.as_deref()),
            deleted: format_optional(record.deletion_timestamp.as_deref()),
        }
    }
}

fn print_summary(summary: &ReconcileSummary, store: &LedgerStore, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(summary)?,
        OutputFormat::Table => {
            print_success(&format!(
                "{}: {} active, {} inserted, {} updated, {} unchanged, {} archived",
                store.table_path().display(),
                summary.active,
                summary.inserted.len(),
                summary.updated.len(),
                summary.unchanged,
                summary.archived.len(),
            ));
            for name in &summary.archived {
                print_info(&format!(
                    "{} archived to {}",
                    name,
                    store.archive_path().display()
                ));
            }
        }
    }
    Ok(())
}

/// Reconcile the ledger on every tick
struct ReconcileWatch {
    source: Arc<dyn SnapshotSource>,
    store: LedgerStore,
    config: MonitorConfig,
    format: OutputFormat,
}

#[async_trait]
impl CycleTask for ReconcileWatch {
    async fn run_cycle(&self) -> Result<(), MonitorError> {
        let summary = reconcile_pod_ledger(
            self.source.as_ref(),
            &self.store,
            &self.config.namespace,
            self.config.keep_key(),
        )
        .await?;

        if let Err(e) = print_summary(&summary, &self.store, self.format) {
            tracing::warn!(error = %e, "Could not print reconcile summary");
        }
        Ok(())
    }
}

pub async fn reconcile(
    source: Arc<dyn SnapshotSource>,
    config: MonitorConfig,
    format: OutputFormat,
    watch: bool,
) -> Result<()> {
    let store = config
        .ledger_store()
        .context("No ledger table configured: pass --table or set `ledger_table`")?;

    if watch {
        let interval = config.interval();
        let fail_fast = config.fail_fast;
        let task = Arc::new(ReconcileWatch {
            source,
            store,
            config,
            format,
        });
        return super::watch(task, interval, fail_fast).await;
    }

    let summary =
        reconcile_pod_ledger(source.as_ref(), &store, &config.namespace, config.keep_key()).await?;
    print_summary(&summary, &store, format)
}

/// Print the active table, or the archive when `archived` is set
pub fn show(store: &LedgerStore, archived: bool, format: OutputFormat) -> Result<()> {
    let records = if archived {
        store.load_archive()?
    } else {
        store.load_active()?
    };

    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Table => {
            if records.is_empty() {
                let path = if archived {
                    store.archive_path()
                } else {
                    store.table_path()
                };
                print_info(&format!("No pods recorded in {}", path.display()));
            } else {
                print_rows(records.iter().map(RecordRow::from).collect::<Vec<_>>());
            }
        }
    }
    Ok(())
}
