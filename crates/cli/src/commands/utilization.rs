//! `podscope utilization`

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use podscope_core::{
    compute_utilization, CycleTask, MonitorConfig, MonitorError, SnapshotSource,
    UtilizationOptions, UtilizationSummary,
};
use std::sync::Arc;
use tabled::Tabled;

use crate::output::{
    color_percent, format_cores, format_gb, print_json, print_rows, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct UtilizationRow {
    #[tabled(rename = "Deployment")]
    name: String,
    #[tabled(rename = "Replicas")]
    replicas: u32,
    #[tabled(rename = "Pods")]
    pods: usize,
    #[tabled(rename = "Mem Mean")]
    memory_mean: String,
    #[tabled(rename = "Mem Min")]
    memory_min: String,
    #[tabled(rename = "Mem Max")]
    memory_max: String,
    #[tabled(rename = "Mem Req")]
    memory_request: String,
    #[tabled(rename = "CPU Mean")]
    cpu_mean: String,
    #[tabled(rename = "CPU Min")]
    cpu_min: String,
    #[tabled(rename = "CPU Max")]
    cpu_max: String,
    #[tabled(rename = "CPU Req")]
    cpu_request: String,
}

/// Print one utilization summary
pub fn print_summary(summary: &UtilizationSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(summary)?,
        OutputFormat::Table => {
            if summary.reports.is_empty() {
                print_warning("No deployment utilization available");
            } else {
                let rows: Vec<UtilizationRow> = summary
                    .reports
                    .iter()
                    .map(|(name, report)| UtilizationRow {
                        name: name.clone(),
                        replicas: report.replicas,
                        pods: report.matched_pods(),
                        memory_mean: color_percent(report.memory.mean),
                        memory_min: color_percent(report.memory.min),
                        memory_max: color_percent(report.memory.max),
                        memory_request: format_gb(report.memory.requested),
                        cpu_mean: color_percent(report.cpu.mean),
                        cpu_min: color_percent(report.cpu.min),
                        cpu_max: color_percent(report.cpu.max),
                        cpu_request: format_cores(report.cpu.requested),
                    })
                    .collect();
                print_rows(rows);
            }

            for (name, report) in &summary.reports {
                if !report.missing_samples.is_empty() {
                    print_warning(&format!(
                        "{}: no usage reported for {}",
                        name,
                        report.missing_samples.join(", ")
                    ));
                }
            }
            for failure in &summary.failures {
                print_warning(&failure.to_string());
            }
        }
    }
    Ok(())
}

/// Compute and print utilization on every tick
struct UtilizationWatch {
    source: Arc<dyn SnapshotSource>,
    config: MonitorConfig,
    format: OutputFormat,
}

#[async_trait]
impl CycleTask for UtilizationWatch {
    async fn run_cycle(&self) -> Result<(), MonitorError> {
        let summary = compute_utilization(
            self.source.as_ref(),
            &self.config.namespace,
            self.config.keep_key(),
            UtilizationOptions::from(&self.config),
        )
        .await?;

        if let OutputFormat::Table = self.format {
            let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S %Z");
            println!("\n{}", format!("{} ({})", self.config.namespace, now).bold());
        }
        if let Err(e) = print_summary(&summary, self.format) {
            print_warning(&format!("Could not print utilization: {e}"));
        }
        Ok(())
    }
}

pub async fn run(
    source: Arc<dyn SnapshotSource>,
    config: MonitorConfig,
    format: OutputFormat,
    watch: bool,
) -> Result<()> {
    if watch {
        let interval = config.interval();
        let fail_fast = config.fail_fast;
        let task = Arc::new(UtilizationWatch {
            source,
            config,
            format,
        });
        return super::watch(task, interval, fail_fast).await;
    }

    let summary = compute_utilization(
        source.as_ref(),
        &config.namespace,
        config.keep_key(),
        UtilizationOptions::from(&config),
    )
    .await?;
    print_summary(&summary, format)
}
