//! Podscope CLI
//!
//! One-shot and watch-mode views of a namespace: per-deployment utilization
//! against requests, the pod ledger and a per-pod status summary.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crate::config::Overrides;
use kube::config::{KubeConfigOptions, Kubeconfig};
use podscope_core::{KubeSnapshotSource, LedgerStore, MonitorConfig, SnapshotSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Podscope CLI
#[derive(Parser)]
#[command(name = "podscope")]
#[command(author, version, about = "Namespace resource utilization and pod ledger", long_about = None)]
pub struct Cli {
    /// Namespace to inspect (can also be set via PODSCOPE_NAMESPACE)
    #[arg(long, short, global = true, env = "PODSCOPE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Config file (defaults to ~/.config/podscope/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, global = true, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show per-deployment utilization as a percentage of requests
    Utilization {
        /// Only deployments whose name contains this key
        #[arg(long, short)]
        keep_key: Option<String>,

        /// Only count this container (defaults to all containers)
        #[arg(long, short)]
        container: Option<String>,

        /// Repeat every interval until interrupted
        #[arg(long, short)]
        watch: bool,

        /// Seconds between cycles in watch mode
        #[arg(long, short)]
        interval: Option<u64>,
    },

    /// Maintain or inspect the pod ledger
    #[command(subcommand)]
    Ledger(LedgerCommands),

    /// Show restarts, usage and container state for each pod
    Pods {
        /// Only pods owned by this deployment
        #[arg(long, short)]
        deployment: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Bring the ledger table in line with the pods currently running
    Reconcile {
        /// Ledger table path
        #[arg(long, short)]
        table: Option<PathBuf>,

        /// Archive path (defaults to <table>.archive.csv)
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Only pods whose owning deployment contains this key
        #[arg(long, short)]
        keep_key: Option<String>,

        /// Repeat every interval until interrupted
        #[arg(long, short)]
        watch: bool,

        /// Seconds between cycles in watch mode
        #[arg(long, short)]
        interval: Option<u64>,
    },

    /// Print the rows of the ledger table or its archive
    Show {
        /// Ledger table path
        #[arg(long, short, env = "PODSCOPE_LEDGER_TABLE")]
        table: PathBuf,

        /// Archive path (defaults to <table>.archive.csv)
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Show archived pods instead of active ones
        #[arg(long)]
        archived: bool,
    },
}

async fn connect(kubeconfig: Option<&Path>, config: &MonitorConfig) -> Result<Arc<dyn SnapshotSource>> {
    let client = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            let client_config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("Invalid kubeconfig")?;
            kube::Client::try_from(client_config).context("Failed to build cluster client")?
        }
        None => kube::Client::try_default()
            .await
            .context("Failed to connect to the cluster")?,
    };

    let source = KubeSnapshotSource::new(client)
        .with_container(config.container_name.clone())
        .with_timeout(config.snapshot_timeout())
        .with_bare_cpu_policy(config.bare_cpu_policy());
    Ok(Arc::new(source))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config_file = cli.config.as_deref();
    let kubeconfig = cli.kubeconfig.as_deref();

    match cli.command {
        Commands::Utilization {
            keep_key,
            container,
            watch,
            interval,
        } => {
            let config = config::monitor_config(
                config_file,
                Overrides {
                    namespace: cli.namespace,
                    keep_key,
                    container_name: container,
                    interval_secs: interval,
                    ..Default::default()
                },
            )?;
            let source = connect(kubeconfig, &config).await?;
            commands::utilization::run(source, config, cli.format, watch).await?;
        }
        Commands::Ledger(LedgerCommands::Reconcile {
            table,
            archive,
            keep_key,
            watch,
            interval,
        }) => {
            let config = config::monitor_config(
                config_file,
                Overrides {
                    namespace: cli.namespace,
                    keep_key,
                    interval_secs: interval,
                    ledger_table: table,
                    ledger_archive: archive,
                    ..Default::default()
                },
            )?;
            let source = connect(kubeconfig, &config).await?;
            commands::ledger::reconcile(source, config, cli.format, watch).await?;
        }
        Commands::Ledger(LedgerCommands::Show {
            table,
            archive,
            archived,
        }) => {
            let store = match archive {
                Some(archive) => LedgerStore::new(table, archive),
                None => LedgerStore::beside(table),
            };
            commands::ledger::show(&store, archived, cli.format)?;
        }
        Commands::Pods { deployment } => {
            let config = config::monitor_config(
                config_file,
                Overrides {
                    namespace: cli.namespace,
                    ..Default::default()
                },
            )?;
            let source = connect(kubeconfig, &config).await?;
            commands::pods::run(
                source.as_ref(),
                &config.namespace,
                deployment.as_deref(),
                cli.format,
            )
            .await?;
        }
    }

    Ok(())
}
