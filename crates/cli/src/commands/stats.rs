//! Host latency statistics

use anyhow::Result;
use boost_lib::HostStats;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_band, color_latency, print_json, print_table, OutputFormat};

/// Row for the host statistics table
#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Avg")]
    avg: String,
    #[tabled(rename = "Band")]
    band: String,
    #[tabled(rename = "Samples")]
    samples: u64,
    #[tabled(rename = "Last Seen")]
    last_at: String,
}

impl From<&HostStats> for StatsRow {
    fn from(stats: &HostStats) -> Self {
        Self {
            host: stats.host.clone(),
            avg: color_latency(stats.avg_ms),
            band: color_band(stats.avg_ms),
            samples: stats.samples,
            last_at: stats.last_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Show statistics for one host, or for every host when none is given
pub async fn show_stats(client: &ApiClient, host: Option<String>, format: OutputFormat) -> Result<()> {
    let stats = match &host {
        Some(host) => vec![client.host_stats(host).await?],
        None => client.list_stats().await?,
    };

    match format {
        OutputFormat::Json => match host {
            Some(_) => print_json(&stats[0])?,
            None => print_json(&stats)?,
        },
        OutputFormat::Table => {
            println!("{}", "Host Latency".bold());
            let rows: Vec<StatsRow> = stats.iter().map(StatsRow::from).collect();
            print_table(&rows);
        }
    }

    Ok(())
}
