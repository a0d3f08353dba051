//! CLI subcommands

pub mod ledger;
pub mod pods;
pub mod utilization;

use anyhow::Result;
use podscope_core::{CycleTask, PollerBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Repeat `task` every `interval` until Ctrl-C
pub async fn watch(task: Arc<dyn CycleTask>, interval: Duration, fail_fast: bool) -> Result<()> {
    let poller = PollerBuilder::new()
        .task(task)
        .interval(interval)
        .fail_fast(fail_fast)
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut handle = tokio::spawn(poller.run(shutdown_rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            let _ = shutdown_tx.send(());
            (&mut handle).await??;
        }
        finished = &mut handle => {
            finished??;
        }
    }

    Ok(())
}
