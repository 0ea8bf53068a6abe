//! Runtime configuration for the boost engine
//!
//! Configuration is an explicit value handed to every component at
//! construction time. Defaults come from [`BoostConfig::default`] and can be
//! overridden field by field with [`BoostConfig::merged`].

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default latency above which a host counts as slow (milliseconds)
pub const DEFAULT_THRESHOLD_MS: f64 = 300.0;

/// Default minimum sample count before an average is meaningful
pub const DEFAULT_MIN_SAMPLE_COUNT: u64 = 3;

/// Default aggregation flush period (30 seconds)
pub const DEFAULT_WRITE_BATCH_MS: u64 = 30_000;

/// Default expiry window for stats and index entries (7 days)
pub const DEFAULT_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Errors raised when a configuration value is unusable
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("thresholdMs must be a finite, non-negative number (got {0})")]
    InvalidThreshold(f64),
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("minSampleCount must be at least 1")]
    ZeroSampleCount,
}

fn at_least_one<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(u64::deserialize(deserializer)?.max(1))
}

/// How a slow resource is swapped for its mirror
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceMode {
    /// Build a replacement element pointing at the mirror
    #[default]
    Dom,
    /// Install a network redirect rule and re-request the original URL
    Redirect,
}

/// Where a DOM replacement is inserted relative to the original
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Insert next to the original; the original stays live until the
    /// replacement has loaded
    #[default]
    Adjacent,
    /// Swap the original out immediately and swap it back on failure
    InPlace,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoostConfig {
    /// Average latency at or above which a host is considered slow
    #[serde(alias = "latencyThresholdMs")]
    pub threshold_ms: f64,
    /// Samples needed before a host average is statistically meaningful;
    /// at least 1
    #[serde(deserialize_with = "at_least_one")]
    pub min_sample_count: u64,
    /// Emit diagnostic logging for the engine's normal paths
    pub enable_logging: bool,
    /// Aggregation flush period in milliseconds
    pub write_batch_ms: u64,
    /// Expiry window for stats and integrity entries in milliseconds
    pub ttl_ms: u64,
    /// Extra attempts for a failed batch write
    pub max_write_retries: u32,
    /// Pause between batch write attempts in milliseconds
    pub retry_delay_ms: u64,
    /// How long a replacement may take to settle before it is abandoned
    pub replace_timeout_ms: u64,
    /// Replacement strategy
    pub strategy: ReplaceMode,
    /// Placement used by DOM substitution
    pub placement: Placement,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_THRESHOLD_MS,
            min_sample_count: DEFAULT_MIN_SAMPLE_COUNT,
            enable_logging: false,
            write_batch_ms: DEFAULT_WRITE_BATCH_MS,
            ttl_ms: DEFAULT_TTL_MS,
            max_write_retries: 2,
            retry_delay_ms: 50,
            replace_timeout_ms: 10_000,
            strategy: ReplaceMode::default(),
            placement: Placement::default(),
        }
    }
}

/// Partial configuration record, typically what a settings page stored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrides {
    #[serde(alias = "latencyThresholdMs")]
    pub threshold_ms: Option<f64>,
    pub min_sample_count: Option<u64>,
    pub enable_logging: Option<bool>,
    pub write_batch_ms: Option<u64>,
    pub ttl_ms: Option<u64>,
    pub max_write_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub replace_timeout_ms: Option<u64>,
    pub strategy: Option<ReplaceMode>,
    pub placement: Option<Placement>,
}

impl BoostConfig {
    /// Defaults with `overrides` applied on top
    pub fn from_overrides(overrides: &ConfigOverrides) -> Self {
        Self::default().merged(overrides)
    }

    /// Return a copy of `self` with every field set in `overrides` replaced.
    ///
    /// `min_sample_count` is clamped to at least 1.
    pub fn merged(&self, overrides: &ConfigOverrides) -> Self {
        let mut out = self.clone();
        if let Some(v) = overrides.threshold_ms {
            out.threshold_ms = v;
        }
        if let Some(v) = overrides.min_sample_count {
            out.min_sample_count = v;
        }
        if let Some(v) = overrides.enable_logging {
            out.enable_logging = v;
        }
        if let Some(v) = overrides.write_batch_ms {
            out.write_batch_ms = v;
        }
        if let Some(v) = overrides.ttl_ms {
            out.ttl_ms = v;
        }
        if let Some(v) = overrides.max_write_retries {
            out.max_write_retries = v;
        }
        if let Some(v) = overrides.retry_delay_ms {
            out.retry_delay_ms = v;
        }
        if let Some(v) = overrides.replace_timeout_ms {
            out.replace_timeout_ms = v;
        }
        if let Some(v) = overrides.strategy {
            out.strategy = v;
        }
        if let Some(v) = overrides.placement {
            out.placement = v;
        }
        out.min_sample_count = out.min_sample_count.max(1);
        out
    }

    /// Check that the values can drive the engine
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold_ms.is_finite() || self.threshold_ms < 0.0 {
            return Err(ConfigError::InvalidThreshold(self.threshold_ms));
        }
        if self.min_sample_count == 0 {
            return Err(ConfigError::ZeroSampleCount);
        }
        if self.write_batch_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "writeBatchMs",
            });
        }
        if self.ttl_ms == 0 {
            return Err(ConfigError::ZeroDuration { field: "ttlMs" });
        }
        if self.replace_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "replaceTimeoutMs",
            });
        }
        Ok(())
    }

    pub fn write_batch(&self) -> Duration {
        Duration::from_millis(self.write_batch_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn replace_timeout(&self) -> Duration {
        Duration::from_millis(self.replace_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BoostConfig::default();
        assert_eq!(config.threshold_ms, 300.0);
        assert_eq!(config.min_sample_count, 3);
        assert!(!config.enable_logging);
        assert_eq!(config.write_batch(), Duration::from_secs(30));
        assert_eq!(config.ttl(), Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(config.strategy, ReplaceMode::Dom);
        assert_eq!(config.placement, Placement::Adjacent);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merged_applies_only_set_fields() {
        let overrides = ConfigOverrides {
            threshold_ms: Some(150.0),
            enable_logging: Some(true),
            ..Default::default()
        };

        let config = BoostConfig::from_overrides(&overrides);
        assert_eq!(config.threshold_ms, 150.0);
        assert!(config.enable_logging);
        assert_eq!(config.min_sample_count, DEFAULT_MIN_SAMPLE_COUNT);
        assert_eq!(config.write_batch_ms, DEFAULT_WRITE_BATCH_MS);
    }

    #[test]
    fn test_merged_does_not_touch_base() {
        let base = BoostConfig::default();
        let _ = base.merged(&ConfigOverrides {
            ttl_ms: Some(1),
            ..Default::default()
        });
        assert_eq!(base.ttl_ms, DEFAULT_TTL_MS);
    }

    #[test]
    fn test_min_sample_count_clamped() {
        let config = BoostConfig::from_overrides(&ConfigOverrides {
            min_sample_count: Some(0),
            ..Default::default()
        });
        assert_eq!(config.min_sample_count, 1);
    }

    #[test]
    fn test_deserialized_min_sample_count_clamped() {
        let config: BoostConfig = serde_json::from_str(r#"{"minSampleCount": 0}"#).unwrap();
        assert_eq!(config.min_sample_count, 1);
        assert!(config.validate().is_ok());

        let config: BoostConfig = serde_json::from_str(r#"{"minSampleCount": 5}"#).unwrap();
        assert_eq!(config.min_sample_count, 5);
    }

    #[test]
    fn test_validate_rejects_zero_sample_count() {
        let config = BoostConfig {
            min_sample_count: 0,
            ..BoostConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroSampleCount));
    }

    #[test]
    fn test_deserialize_partial_camel_case() {
        let config: BoostConfig =
            serde_json::from_str(r#"{"thresholdMs": 500, "enableLogging": true}"#).unwrap();
        assert_eq!(config.threshold_ms, 500.0);
        assert!(config.enable_logging);
        assert_eq!(config.ttl_ms, DEFAULT_TTL_MS);
    }

    #[test]
    fn test_deserialize_legacy_threshold_name() {
        let overrides: ConfigOverrides =
            serde_json::from_str(r#"{"latencyThresholdMs": 750}"#).unwrap();
        assert_eq!(overrides.threshold_ms, Some(750.0));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = BoostConfig::default();
        config.threshold_ms = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold(_))
        ));

        let mut config = BoostConfig::default();
        config.write_batch_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                field: "writeBatchMs"
            })
        );
    }
}
