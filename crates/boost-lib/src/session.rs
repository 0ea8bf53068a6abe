//! Per-page orchestration
//!
//! A page session scans the document once, then runs the replacer and the
//! aggregation cycle side by side. The cycle drains the sample buffer every
//! `write_batch_ms` and stops by itself once every detected resource has
//! either been aggregated or settled without a sample.

use crate::aggregator::Aggregator;
use crate::collector::{SampleCollector, TimingSource, TimingSummary};
use crate::config::BoostConfig;
use crate::dom::Dom;
use crate::mirror::{strategy_for, MirrorReplacer, ReplaceReport, RuleArena};
use crate::storage::Storage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Shortest aggregation period accepted by the cycle
const MIN_CYCLE: Duration = Duration::from_millis(1);

/// What one page session did
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub detected: usize,
    /// Resources measured from the timing buffer at scan time
    pub timed: usize,
    pub replacements: ReplaceReport,
    /// Aggregation passes that found samples to write
    pub passes: usize,
    pub aggregated: usize,
    /// Detected resources that failed to load or had an unusable URL
    pub dropped: usize,
    /// Per-type load times of the page
    pub timings: TimingSummary,
    /// The cycle ended on the shutdown signal rather than by itself
    pub interrupted: bool,
}

/// Wires collector, aggregator and replacer together for one page
pub struct PageSession {
    config: BoostConfig,
    collector: SampleCollector,
    aggregator: Aggregator,
    replacer: MirrorReplacer,
}

impl PageSession {
    /// `arena` must be shared by every session using the same rule engine,
    /// so that rule ids stay unique across pages
    pub fn new(
        config: BoostConfig,
        storage: Storage,
        dom: Arc<dyn Dom>,
        timing: Arc<dyn TimingSource>,
        arena: RuleArena,
    ) -> Self {
        let strategy = strategy_for(&config, Arc::clone(&dom), arena);
        Self {
            collector: SampleCollector::new(config.clone(), dom, timing),
            aggregator: Aggregator::new(config.clone(), storage.clone()),
            replacer: MirrorReplacer::new(&config, storage, strategy),
            config,
        }
    }

    pub fn collector(&self) -> &SampleCollector {
        &self.collector
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Scan, replace and aggregate until done or `shutdown` fires
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> SessionReport {
        let mut scan = self.collector.scan();
        let detected = scan.detected();

        let (replacements, cycle) = tokio::join!(
            self.replacer.process(&scan.elements),
            self.aggregation_cycle(detected, &scan.listeners, shutdown)
        );

        // Listeners for resources that never settled are no longer useful
        for handle in scan.listeners.drain(..) {
            handle.abort();
        }

        info!(
            detected,
            timed = scan.timed,
            replaced = replacements.replaced(),
            aggregated = cycle.aggregated,
            dropped = cycle.dropped,
            interrupted = cycle.interrupted,
            "Page session finished"
        );

        SessionReport {
            detected,
            timed: scan.timed,
            replacements,
            passes: cycle.passes,
            aggregated: cycle.aggregated,
            dropped: cycle.dropped,
            timings: scan.summary,
            interrupted: cycle.interrupted,
        }
    }

    async fn aggregation_cycle(
        &self,
        detected: usize,
        listeners: &[JoinHandle<()>],
        mut shutdown: broadcast::Receiver<()>,
    ) -> CycleStats {
        let mut stats = CycleStats::default();
        let mut ticker = interval(self.config.write_batch().max(MIN_CYCLE));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Checked before the flush so late pushes are drained
                    let listening = listeners.iter().any(|h| !h.is_finished());
                    self.flush(&mut stats).await;
                    stats.dropped = self.collector.buffer().stats().dropped as usize;
                    if stats.aggregated + stats.dropped >= detected || !listening {
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    self.flush(&mut stats).await;
                    stats.dropped = self.collector.buffer().stats().dropped as usize;
                    stats.interrupted = true;
                    break;
                }
            }
        }
        stats
    }

    async fn flush(&self, stats: &mut CycleStats) {
        let samples = self.collector.drain();
        if samples.is_empty() {
            return;
        }

        let report = self.aggregator.aggregate(&samples).await;
        stats.passes += 1;
        stats.aggregated += samples.len();

        if self.config.enable_logging {
            debug!(
                samples = samples.len(),
                total = stats.aggregated,
                "Aggregation cycle flushed samples"
            );
        }
        if report.stats_batch.is_failed() || report.integrity_batch.is_failed() {
            debug!(
                stats_batch = ?report.stats_batch,
                integrity_batch = ?report.integrity_batch,
                "Aggregation cycle lost a batch"
            );
        }
    }
}

#[derive(Debug, Default)]
struct CycleStats {
    passes: usize,
    aggregated: usize,
    dropped: usize,
    interrupted: bool,
}
