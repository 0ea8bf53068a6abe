//! Aggregation of latency samples into persistent statistics
//!
//! Each aggregation pass:
//! - folds samples into per-host running means (`host:<host>`)
//! - unions sample URLs into the integrity index (`integrity:<digest>`)
//! - writes both as independent batches, each retried on its own
//!
//! Expiry of stale records lives in [`expiry`].

mod expiry;


pub use expiry::{ExpiryWorker, SweepReport};

use crate::config::BoostConfig;
use crate::models::{HostStats, IntegrityEntry, Sample};
use crate::observability::BoostMetrics;
use crate::storage::{Partition, Storage, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of one batch write
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BatchOutcome {
    /// Nothing to write
    Skipped,
    Written { records: usize, attempts: u32 },
    Failed {
        records: usize,
        attempts: u32,
        error: String,
    },
}

impl BatchOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, BatchOutcome::Written { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BatchOutcome::Failed { .. })
    }
}

/// Summary of one aggregation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    /// Samples consumed
    pub samples: usize,
    /// Merged host statistics, as written
    pub hosts: Vec<HostStats>,
    /// Distinct digests merged into the index
    pub digests: usize,
    /// Keys skipped because their current record could not be read
    pub read_failures: usize,
    pub stats_batch: BatchOutcome,
    pub integrity_batch: BatchOutcome,
}

impl Default for AggregateReport {
    fn default() -> Self {
        Self {
            samples: 0,
            hosts: Vec::new(),
            digests: 0,
            read_failures: 0,
            stats_batch: BatchOutcome::Skipped,
            integrity_batch: BatchOutcome::Skipped,
        }
    }
}

/// Folds samples into host statistics and the integrity index
pub struct Aggregator {
    config: BoostConfig,
    storage: Storage,
    metrics: BoostMetrics,
}

struct MergePass<T> {
    records: Vec<T>,
    read_failures: usize,
    outcome: BatchOutcome,
}

impl Aggregator {
    pub fn new(config: BoostConfig, storage: Storage) -> Self {
        Self {
            config,
            storage,
            metrics: BoostMetrics::new(),
        }
    }

    pub fn config(&self) -> &BoostConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Aggregate `samples` stamped with the current time
    pub async fn aggregate(&self, samples: &[Sample]) -> AggregateReport {
        self.aggregate_at(samples, Utc::now()).await
    }

    /// Aggregate `samples` as if the pass ran at `now`.
    ///
    /// An empty slice is a no-op and touches no storage.
    pub async fn aggregate_at(&self, samples: &[Sample], now: DateTime<Utc>) -> AggregateReport {
        if samples.is_empty() {
            return AggregateReport::default();
        }

        let started = Instant::now();
        let (hosts, integrity) = tokio::join!(
            self.merge_hosts(samples, now),
            self.merge_integrity(samples, now)
        );

        self.metrics
            .observe_aggregation_latency(started.elapsed().as_secs_f64());
        self.metrics.inc_samples_aggregated(samples.len() as u64);
        if let BatchOutcome::Written { records, .. } = hosts.outcome {
            self.metrics.inc_hosts_merged(records as u64);
        }

        if self.config.enable_logging {
            debug!(
                samples = samples.len(),
                hosts = hosts.records.len(),
                digests = integrity.records.len(),
                "Aggregation pass complete"
            );
        }

        AggregateReport {
            samples: samples.len(),
            digests: integrity.records.len(),
            read_failures: hosts.read_failures + integrity.read_failures,
            hosts: hosts.records,
            stats_batch: hosts.outcome,
            integrity_batch: integrity.outcome,
        }
    }

    async fn merge_hosts(&self, samples: &[Sample], now: DateTime<Utc>) -> MergePass<HostStats> {
        let mut groups: BTreeMap<&str, (f64, u64)> = BTreeMap::new();
        for s in samples {
            let group = groups.entry(s.host.as_str()).or_insert((0.0, 0));
            group.0 += s.duration_ms;
            group.1 += 1;
        }

        let mut records = Vec::with_capacity(groups.len());
        let mut read_failures = 0;

        for (host, (sum, count)) in groups {
            let existing = match self.storage.get_stats(host).await {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(host = %host, error = %e, "Failed to read host stats, skipping host");
                    self.metrics.inc_storage_errors();
                    read_failures += 1;
                    continue;
                }
            };

            let merged = HostStats::fold(existing.as_ref(), host, sum, count, now);
            if merged.samples < self.config.min_sample_count && self.config.enable_logging {
                debug!(
                    key = %merged.key,
                    samples = merged.samples,
                    min = self.config.min_sample_count,
                    "Small sample count"
                );
            }
            records.push(merged);
        }

        let outcome = self
            .write_with_retry(Partition::Stats, records.len(), || {
                self.storage.write_stats_batch(&records)
            })
            .await;

        MergePass {
            records,
            read_failures,
            outcome,
        }
    }

    async fn merge_integrity(
        &self,
        samples: &[Sample],
        now: DateTime<Utc>,
    ) -> MergePass<IntegrityEntry> {
        let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for s in samples {
            if let Some(digest) = s.integrity.as_deref() {
                groups.entry(digest).or_default().push(s.url.as_str());
            }
        }

        let mut records = Vec::with_capacity(groups.len());
        let mut read_failures = 0;

        for (digest, urls) in groups {
            let existing = match self.storage.get_integrity(digest).await {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(integrity = %digest, error = %e, "Failed to read integrity entry, skipping digest");
                    self.metrics.inc_storage_errors();
                    read_failures += 1;
                    continue;
                }
            };
            records.push(IntegrityEntry::fold(existing, digest, urls, now));
        }

        let outcome = self
            .write_with_retry(Partition::IntegrityMap, records.len(), || {
                self.storage.write_integrity_batch(&records)
            })
            .await;

        MergePass {
            records,
            read_failures,
            outcome,
        }
    }

    /// Run `write` until it succeeds or the retry budget is spent
    async fn write_with_retry<F, Fut>(
        &self,
        partition: Partition,
        records: usize,
        mut write: F,
    ) -> BatchOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), StorageError>>,
    {
        if records == 0 {
            return BatchOutcome::Skipped;
        }

        let max_attempts = self.config.max_write_retries + 1;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match write().await {
                Ok(()) => return BatchOutcome::Written { records, attempts },
                Err(e) => {
                    self.metrics.inc_storage_errors();
                    warn!(
                        partition = %partition,
                        records,
                        attempt = attempts,
                        error = %e,
                        "Batch write failed"
                    );
                    if attempts >= max_attempts {
                        return BatchOutcome::Failed {
                            records,
                            attempts,
                            error: e.to_string(),
                        };
                    }
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }
}
