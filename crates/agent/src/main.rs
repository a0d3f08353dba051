//! Podscope agent
//!
//! Polls one namespace, logs per-deployment utilization, keeps the pod ledger
//! current and serves health and metrics endpoints.

use anyhow::{Context, Result};
use podscope_agent::{api, config::AgentConfig};
use podscope_core::{
    health::{components, HealthRegistry},
    observability::{MonitorMetrics, StructuredLogger},
    KubeSnapshotSource, MonitorCycle, PollerBuilder,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting podscope-agent");

    let config = AgentConfig::load()?;
    let monitor = config.monitor.clone();
    info!(namespace = %monitor.namespace, "Agent configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SNAPSHOT).await;
    health_registry.register(components::UTILIZATION).await;
    if monitor.ledger_table.is_some() {
        health_registry.register(components::LEDGER).await;
    }

    let metrics = MonitorMetrics::new();

    let logger = StructuredLogger::new(&monitor.namespace);
    logger.log_startup(
        AGENT_VERSION,
        monitor.interval_secs,
        monitor.ledger_table.is_some(),
    );

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let source = KubeSnapshotSource::try_default()
        .await
        .context("Failed to connect to the cluster")?
        .with_container(monitor.container_name.clone())
        .with_timeout(monitor.snapshot_timeout())
        .with_bare_cpu_policy(monitor.bare_cpu_policy());

    let cycle = MonitorCycle::new(
        Arc::new(source),
        monitor.clone(),
        health_registry.clone(),
        metrics.clone(),
    );
    let poller = PollerBuilder::new()
        .task(Arc::new(cycle))
        .interval(monitor.interval())
        .fail_fast(monitor.fail_fast)
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut poller_handle = tokio::spawn(poller.run(shutdown_rx));

    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            let _ = shutdown_tx.send(());
            match (&mut poller_handle).await {
                Ok(Ok(stats)) => info!(cycles = stats.cycles, failures = stats.failures, "Poller stopped"),
                Ok(Err(e)) => error!(error = %e, "Poller stopped with an error"),
                Err(e) => error!(error = %e, "Poller task panicked"),
            }
            "SIGINT received".to_string()
        }
        finished = &mut poller_handle => {
            match finished {
                Ok(Ok(_)) => "poller stopped".to_string(),
                Ok(Err(e)) => format!("fail-fast: {e}"),
                Err(e) => format!("poller task panicked: {e}"),
            }
        }
    };

    logger.log_shutdown(&reason);
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
