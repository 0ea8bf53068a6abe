//! Agent configuration
//!
//! Read from `BOOST_*` environment variables and, when `BOOST_CONFIG_FILE`
//! names one, a configuration file. Environment values win over the file.

use anyhow::{Context, Result};
use boost_lib::config::{BoostConfig, ConfigOverrides, Placement, ReplaceMode};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_VAR: &str = "BOOST_CONFIG_FILE";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name reported in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Port of the local HTTP API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON file backing the store
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Expiry sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Engine settings; unset fields keep the engine defaults
    #[serde(default)]
    pub threshold_ms: Option<f64>,
    #[serde(default)]
    pub min_sample_count: Option<u64>,
    #[serde(default)]
    pub enable_logging: Option<bool>,
    #[serde(default)]
    pub write_batch_ms: Option<u64>,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub max_write_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub replace_timeout_ms: Option<u64>,
    #[serde(default)]
    pub strategy: Option<ReplaceMode>,
    #[serde(default)]
    pub placement: Option<Placement>,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "mirror-boost-agent".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_data_path() -> PathBuf {
    PathBuf::from("mirror-boost.json")
}

fn default_sweep_interval() -> u64 {
    3600
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            api_port: default_api_port(),
            data_path: default_data_path(),
            sweep_interval_secs: default_sweep_interval(),
            threshold_ms: None,
            min_sample_count: None,
            enable_logging: None,
            write_batch_ms: None,
            ttl_ms: None,
            max_write_retries: None,
            retry_delay_ms: None,
            replace_timeout_ms: None,
            strategy: None,
            placement: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment and config file
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var(CONFIG_FILE_VAR) {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("BOOST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read agent configuration")?;

        let agent: AgentConfig = config
            .try_deserialize()
            .context("invalid agent configuration")?;
        agent.validate()?;
        Ok(agent)
    }

    /// Reject values the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be greater than zero");
        }
        self.boost()
            .validate()
            .context("invalid engine configuration")?;
        Ok(())
    }

    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            threshold_ms: self.threshold_ms,
            min_sample_count: self.min_sample_count,
            enable_logging: self.enable_logging,
            write_batch_ms: self.write_batch_ms,
            ttl_ms: self.ttl_ms,
            max_write_retries: self.max_write_retries,
            retry_delay_ms: self.retry_delay_ms,
            replace_timeout_ms: self.replace_timeout_ms,
            strategy: self.strategy,
            placement: self.placement,
        }
    }

    /// Engine configuration with this agent's overrides applied
    pub fn boost(&self) -> BoostConfig {
        BoostConfig::from_overrides(&self.overrides())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
