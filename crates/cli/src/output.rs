//! Output formatting utilities

use boost_lib::collector::LatencyBand;
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

/// Print a table from a list of rows
pub fn print_table<T: Tabled>(rows: &[T]) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format milliseconds with one decimal
pub fn format_ms(ms: f64) -> String {
    format!("{:.1} ms", ms)
}

/// Latency coloured by its band
pub fn color_latency(ms: f64) -> String {
    let formatted = format_ms(ms);
    match LatencyBand::classify(ms) {
        LatencyBand::Fast => formatted.green().to_string(),
        LatencyBand::Moderate => formatted.yellow().to_string(),
        LatencyBand::Slow => formatted.red().to_string(),
        LatencyBand::Critical => formatted.red().bold().to_string(),
    }
}

/// Band name coloured the same way as its latency
pub fn color_band(ms: f64) -> String {
    let band = LatencyBand::classify(ms).to_string();
    match LatencyBand::classify(ms) {
        LatencyBand::Fast => band.green().to_string(),
        LatencyBand::Moderate => band.yellow().to_string(),
        LatencyBand::Slow | LatencyBand::Critical => band.red().to_string(),
    }
}
