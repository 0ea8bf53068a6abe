//! Observability infrastructure for mirror boosting
//!
//! Provides:
//! - Prometheus metrics (aggregation latency, storage errors, replacements, expiry)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for aggregation latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

static GLOBAL_METRICS: OnceLock<BoostMetricsInner> = OnceLock::new();

struct BoostMetricsInner {
    aggregation_latency_seconds: Histogram,
    samples_aggregated: IntCounter,
    hosts_merged: IntCounter,
    storage_errors: IntCounter,
    replacements: IntCounterVec,
    expired_entries: IntCounterVec,
}

impl BoostMetricsInner {
    fn new() -> Self {
        Self {
            aggregation_latency_seconds: register_histogram!(
                "mirror_boost_aggregation_latency_seconds",
                "Time spent merging samples into storage",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register aggregation_latency_seconds"),

            samples_aggregated: register_int_counter!(
                "mirror_boost_samples_aggregated_total",
                "Total number of latency samples aggregated"
            )
            .expect("Failed to register samples_aggregated"),

            hosts_merged: register_int_counter!(
                "mirror_boost_hosts_merged_total",
                "Total number of host statistics records written"
            )
            .expect("Failed to register hosts_merged"),

            storage_errors: register_int_counter!(
                "mirror_boost_storage_errors_total",
                "Total number of failed storage reads and writes"
            )
            .expect("Failed to register storage_errors"),

            replacements: register_int_counter_vec!(
                "mirror_boost_replacements_total",
                "Mirror replacement attempts by outcome",
                &["outcome"]
            )
            .expect("Failed to register replacements"),

            expired_entries: register_int_counter_vec!(
                "mirror_boost_expired_entries_total",
                "Records removed by the expiry sweep",
                &["partition"]
            )
            .expect("Failed to register expired_entries"),
        }
    }
}

/// Metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct BoostMetrics {
    _private: (),
}

impl Default for BoostMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BoostMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(BoostMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &BoostMetricsInner {
        GLOBAL_METRICS.get_or_init(BoostMetricsInner::new)
    }

    pub fn observe_aggregation_latency(&self, duration_secs: f64) {
        self.inner().aggregation_latency_seconds.observe(duration_secs);
    }

    pub fn inc_samples_aggregated(&self, count: u64) {
        self.inner().samples_aggregated.inc_by(count);
    }

    pub fn inc_hosts_merged(&self, count: u64) {
        self.inner().hosts_merged.inc_by(count);
    }

    pub fn inc_storage_errors(&self) {
        self.inner().storage_errors.inc();
    }

    /// Count one replacement attempt; `outcome` is `succeeded`, `failed` or `skipped`
    pub fn inc_replacement(&self, outcome: &str) {
        self.inner()
            .replacements
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_expired(&self, partition: &str, count: u64) {
        self.inner()
            .expired_entries
            .with_label_values(&[partition])
            .inc_by(count);
    }
}

/// Structured logger for boost events
///
/// Provides consistent JSON-formatted logging for replacements,
/// sweeps and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    source: String,
}

impl StructuredLogger {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn log_startup(&self, version: &str, data_path: &str) {
        info!(
            event = "agent_started",
            source = %self.source,
            agent_version = %version,
            data_path = %data_path,
            "Mirror boost agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            source = %self.source,
            reason = %reason,
            "Mirror boost agent shutting down"
        );
    }

    /// Log a slow resource being swapped for a mirror
    pub fn log_replacement(&self, original: &str, mirror: &str, avg_ms: f64, succeeded: bool) {
        if succeeded {
            info!(
                event = "mirror_replaced",
                source = %self.source,
                original = %original,
                mirror = %mirror,
                avg_ms = avg_ms,
                "Replaced slow resource with mirror"
            );
        } else {
            warn!(
                event = "mirror_failed",
                source = %self.source,
                original = %original,
                mirror = %mirror,
                avg_ms = avg_ms,
                "Mirror failed to load, original kept"
            );
        }
    }

    pub fn log_sweep(&self, stats_removed: usize, integrity_removed: usize, failures: usize) {
        if failures > 0 {
            warn!(
                event = "expiry_sweep",
                source = %self.source,
                stats_removed = stats_removed,
                integrity_removed = integrity_removed,
                failures = failures,
                "Expiry sweep finished with failures"
            );
        } else {
            info!(
                event = "expiry_sweep",
                source = %self.source,
                stats_removed = stats_removed,
                integrity_removed = integrity_removed,
                "Expiry sweep finished"
            );
        }
    }
}
