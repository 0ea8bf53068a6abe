//! Expiry sweep trigger

use anyhow::Result;

use crate::client::ApiClient;
use crate::output::{print_json, print_success, print_warning, OutputFormat};

/// Ask the agent to remove records older than its TTL
pub async fn run_sweep(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report = client.sweep().await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Removed {} host records and {} integrity entries older than {}",
                report.stats_removed,
                report.integrity_removed,
                report.cutoff.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            if report.failures > 0 {
                print_warning(&format!(
                    "{} records could not be removed; they will be retried on the next sweep",
                    report.failures
                ));
            }
        }
    }

    Ok(())
}
