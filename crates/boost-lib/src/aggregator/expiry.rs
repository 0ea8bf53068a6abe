//! Expiry of stale statistics and integrity entries
//!
//! Host statistics expire on `lastAt`, integrity entries on `lastSeenAt`.
//! Records whose timestamp is missing or unparseable are left alone.

use super::Aggregator;
use crate::health::HealthRegistry;
use crate::observability::StructuredLogger;
use crate::storage::Partition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const STATS_TIMESTAMP: &str = "lastAt";
const INTEGRITY_TIMESTAMP: &str = "lastSeenAt";

/// Summary of one expiry sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Records older than this were removed
    pub cutoff: DateTime<Utc>,
    pub stats_removed: usize,
    pub integrity_removed: usize,
    /// Scans or deletions that failed; the sweep continues past them
    pub failures: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.stats_removed + self.integrity_removed
    }
}

fn timestamp_field(partition: Partition) -> &'static str {
    match partition {
        Partition::Stats => STATS_TIMESTAMP,
        Partition::IntegrityMap => INTEGRITY_TIMESTAMP,
    }
}

fn is_expired(partition: Partition, record: &Value, cutoff: DateTime<Utc>) -> bool {
    record
        .get(timestamp_field(partition))
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc) < cutoff)
        .unwrap_or(false)
}

impl Aggregator {
    /// Remove every record last touched more than `ttl` ago
    pub async fn clear_expired(&self, ttl: Duration) -> SweepReport {
        self.clear_expired_at(Utc::now(), ttl).await
    }

    /// Remove every record last touched before `now - ttl`
    pub async fn clear_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> SweepReport {
        let cutoff = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let predicate = move |partition: Partition, record: &Value| {
            is_expired(partition, record, cutoff)
        };

        let outcome = match self
            .storage
            .backend()
            .sweep(&[Partition::Stats, Partition::IntegrityMap], &predicate)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Expiry sweep failed");
                self.metrics.inc_storage_errors();
                return SweepReport {
                    cutoff,
                    stats_removed: 0,
                    integrity_removed: 0,
                    failures: 1,
                };
            }
        };

        if self.config.enable_logging {
            for (partition, key) in &outcome.removed {
                debug!(partition = %partition, key = %key, "Removed expired record");
            }
        }

        let report = SweepReport {
            cutoff,
            stats_removed: outcome.removed_from(Partition::Stats),
            integrity_removed: outcome.removed_from(Partition::IntegrityMap),
            failures: outcome.failures,
        };

        self.metrics
            .inc_expired(Partition::Stats.as_str(), report.stats_removed as u64);
        self.metrics
            .inc_expired(Partition::IntegrityMap.as_str(), report.integrity_removed as u64);

        report
    }
}

/// Periodic expiry sweep
pub struct ExpiryWorker {
    aggregator: Arc<Aggregator>,
    interval: Duration,
    ttl: Duration,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

impl ExpiryWorker {
    /// Sweep with the aggregator's configured TTL every `interval`
    pub fn new(aggregator: Arc<Aggregator>, interval: Duration) -> Self {
        let ttl = aggregator.config().ttl();
        Self {
            aggregator,
            interval,
            ttl,
            health: None,
            logger: StructuredLogger::new("expiry-worker"),
        }
    }

    /// Report sweep results to `health` for the sweeper and storage
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run one sweep and report it
    pub async fn sweep_once(&self) -> SweepReport {
        let report = self.aggregator.clear_expired(self.ttl).await;
        self.logger
            .log_sweep(report.stats_removed, report.integrity_removed, report.failures);

        if let Some(health) = &self.health {
            health.observe_sweep(&report).await;
        }
        report
    }

    /// Sweep on every tick until shutdown; the first sweep runs immediately
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            ttl_secs = self.ttl.as_secs(),
            "Starting expiry worker"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down expiry worker");
                    break;
                }
            }
        }
    }
}
