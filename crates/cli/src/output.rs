//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a rounded table of rows
pub fn print_rows<T: Tabled>(rows: Vec<T>) {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Percentage with one decimal, colored by how close it is to the request
pub fn color_percent(percent: f64) -> String {
    let formatted = format!("{:.1}%", percent);
    if percent >= 90.0 {
        formatted.red().to_string()
    } else if percent >= 70.0 {
        formatted.yellow().to_string()
    } else if percent < 10.0 {
        formatted.dimmed().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Gigabytes with two decimals
pub fn format_gb(gb: f64) -> String {
    format!("{:.2}GB", gb)
}

/// Whole cores; values below one core are shown in millicores
pub fn format_cores(cores: f64) -> String {
    if cores >= 1.0 {
        format!("{:.2}", cores)
    } else {
        format!("{:.0}m", cores * 1000.0)
    }
}

pub fn format_optional<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Color a pod phase or container state
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "running" | "succeeded" | "completed" => status.green().to_string(),
        "pending" | "waiting" | "containercreating" => status.yellow().to_string(),
        "terminated" | "failed" | "crashloopbackoff" | "oomkilled" | "error" => {
            status.red().to_string()
        }
        _ => status.to_string(),
    }
}
