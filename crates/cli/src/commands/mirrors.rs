//! Mirror candidate lookup

use anyhow::Result;
use colored::Colorize;

use crate::client::ApiClient;
use crate::output::{color_latency, print_info, print_json, print_warning, OutputFormat};

/// Show the same-digest alternatives the agent knows for a resource
pub async fn show_mirrors(
    client: &ApiClient,
    integrity: &str,
    url: &str,
    format: OutputFormat,
) -> Result<()> {
    let lookup = client.mirrors(integrity, url).await?;

    match format {
        OutputFormat::Json => print_json(&lookup)?,
        OutputFormat::Table => {
            println!("{}", "Mirror Lookup".bold());
            println!("{}", "=".repeat(50));
            println!("Host:       {}", lookup.host.cyan());
            match lookup.avg_ms {
                Some(avg) => println!(
                    "Average:    {} over {} samples",
                    color_latency(avg),
                    lookup.samples
                ),
                None => println!("Average:    {}", "no samples".dimmed()),
            }
            println!();

            if !lookup.slow {
                print_info("Host is below the slow threshold; no replacement would be attempted");
            }

            if lookup.candidates.is_empty() {
                print_warning("No other host serves this digest");
                return Ok(());
            }

            println!("{}", "Candidates".bold());
            println!("{}", "-".repeat(50));
            for (i, candidate) in lookup.candidates.iter().enumerate() {
                println!("{:>3}. {}", i + 1, candidate);
            }
        }
    }

    Ok(())
}
