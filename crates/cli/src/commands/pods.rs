//! `podscope pods`

use anyhow::Result;
use podscope_core::{pods::summarize, ContainerStatusView, SnapshotSource};
use tabled::Tabled;

use crate::output::{
    color_status, format_optional, print_info, print_json, print_rows, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "Pod")]
    name: String,
    #[tabled(rename = "Restarts")]
    restarts: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Previous")]
    previous: String,
}

fn status_cell(view: Option<&ContainerStatusView>) -> String {
    match view {
        Some(view) => {
            let state = color_status(&view.state.to_string());
            match &view.reason {
                Some(reason) => format!("{} ({})", state, reason),
                None => state,
            }
        }
        None => "-".to_string(),
    }
}

pub async fn run(
    source: &dyn SnapshotSource,
    namespace: &str,
    deployment: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let observations = source.list_pods(namespace, deployment).await?;

    let samples = match source.list_pod_metrics(namespace).await {
        Ok(samples) => samples,
        Err(e) => {
            print_warning(&format!("Pod metrics unavailable, usage not shown: {}", e));
            Vec::new()
        }
    };

    let rows = summarize(&observations, &samples);

    match format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Table => {
            if rows.is_empty() {
                print_info(&format!("No pods found in {}", namespace));
                return Ok(());
            }
            let table: Vec<PodRow> = rows
                .iter()
                .map(|row| PodRow {
                    name: row.pod_name.clone(),
                    restarts: format_optional(row.restart_count),
                    memory: format_optional(row.memory.map(|gb| format!("{:.3}GB", gb))),
                    cpu: format_optional(row.cpu.map(|cores| format!("{:.3}", cores))),
                    current: status_cell(row.current.as_ref()),
                    previous: status_cell(row.previous.as_ref()),
                })
                .collect();
            print_rows(table);
        }
    }
    Ok(())
}
