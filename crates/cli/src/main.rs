//! Mirror Boost CLI
//!
//! Queries host latency, mirror candidates and expiry on a running
//! mirror-boost agent.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{mirrors, stats, sweep};

/// Mirror Boost CLI
#[derive(Parser)]
#[command(name = "mbctl")]
#[command(author, version, about = "CLI for the Mirror Boost agent", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via MBCTL_API_URL env var)
    #[arg(long, env = "MBCTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show per-host latency statistics
    Stats {
        /// Only show this host
        #[arg(long)]
        host: Option<String>,
    },

    /// Look up same-digest mirrors for a resource
    Mirrors {
        /// Subresource integrity digest, e.g. sha256-...
        #[arg(long)]
        integrity: String,

        /// URL of the resource as the page references it
        #[arg(long)]
        url: String,
    },

    /// Remove expired statistics and integrity entries
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Stats { host } => {
            stats::show_stats(&client, host, cli.format).await?;
        }
        Commands::Mirrors { integrity, url } => {
            mirrors::show_mirrors(&client, &integrity, &url, cli.format).await?;
        }
        Commands::Sweep => {
            sweep::run_sweep(&client, cli.format).await?;
        }
    }

    Ok(())
}
