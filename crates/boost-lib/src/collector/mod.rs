//! Sample collection from SRI-protected page resources
//!
//! This module observes load completions of `<script>`/`<link>` elements that
//! carry an `integrity` attribute. Durations come from the passive resource
//! timing buffer when the element's URL is found there; every other element
//! gets a one-shot load listener measuring from attach time.

mod buffer;
mod timing;


pub use buffer::{BufferStats, SampleBuffer};
pub use timing::{
    summarize_timings, LatencyBand, NoTimings, ResourceTiming, TimingError, TimingKind,
    TimingSource, TimingSummary, TypeSummary,
};

use crate::config::BoostConfig;
use crate::dom::{Dom, LoadOutcome, SriElement};
use crate::models::Sample;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of one scan of the page
#[derive(Debug)]
pub struct ScanReport {
    /// Every SRI-protected element detected, in document order
    pub elements: Vec<SriElement>,
    /// Elements measured from the timing buffer
    pub timed: usize,
    /// Load listeners attached for the remaining elements
    pub listeners: Vec<JoinHandle<()>>,
    /// Per-type load times from the timing buffer at scan time
    pub summary: TimingSummary,
}

impl ScanReport {
    /// Number of detected resources
    pub fn detected(&self) -> usize {
        self.elements.len()
    }

    /// Wait until every fallback listener has settled
    pub async fn settle_listeners(&mut self) {
        for handle in self.listeners.drain(..) {
            if let Err(e) = handle.await {
                debug!(error = %e, "Load listener task ended abnormally");
            }
        }
    }
}

/// Collects load samples for the SRI-protected resources of one page
pub struct SampleCollector {
    config: BoostConfig,
    dom: Arc<dyn Dom>,
    timing: Arc<dyn TimingSource>,
    buffer: Arc<SampleBuffer>,
}

impl SampleCollector {
    pub fn new(config: BoostConfig, dom: Arc<dyn Dom>, timing: Arc<dyn TimingSource>) -> Self {
        Self {
            config,
            dom,
            timing,
            buffer: Arc::new(SampleBuffer::new()),
        }
    }

    /// Shared handle to the sample buffer
    pub fn buffer(&self) -> Arc<SampleBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Record an externally observed sample
    pub fn add_sample(&self, sample: Sample) {
        if self.config.enable_logging {
            debug!(url = %sample.url, duration_ms = sample.duration_ms, "Sample recorded");
        }
        self.buffer.push(sample);
    }

    /// Atomically take every buffered sample
    pub fn drain(&self) -> Vec<Sample> {
        self.buffer.drain()
    }

    /// SRI-protected elements currently on the page
    pub fn detect(&self) -> Vec<SriElement> {
        self.dom.sri_elements()
    }

    /// Detect resources and start measuring them.
    ///
    /// Must be called from within a tokio runtime; fallback listeners run as
    /// spawned tasks that push into the buffer when their element loads.
    pub fn scan(&self) -> ScanReport {
        let elements = self.detect();

        // Elements grouped by URL; duplicates share one timing entry
        let mut unmatched: HashMap<&str, Vec<&SriElement>> = HashMap::new();
        for el in &elements {
            unmatched.entry(el.url.as_str()).or_default().push(el);
        }

        let mut timed = 0;
        let mut summary = TimingSummary::default();
        match self.timing.list_resource_timings() {
            Ok(entries) => {
                summary = summarize_timings(&entries);
                for entry in entries {
                    let Some(matched) = unmatched.remove(entry.name.as_str()) else {
                        continue;
                    };
                    for el in matched {
                        if self.record(el, entry.load_duration()) {
                            timed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                if self.config.enable_logging {
                    warn!(error = %e, "Resource timing failed, falling back to load listeners");
                }
            }
        }

        let listeners = elements
            .iter()
            .filter(|el| unmatched.contains_key(el.url.as_str()))
            .map(|el| self.listen(el.clone()))
            .collect::<Vec<_>>();

        if self.config.enable_logging {
            debug!(
                detected = elements.len(),
                timed,
                listeners = listeners.len(),
                "Scanned page for SRI resources"
            );
        }

        ScanReport {
            elements,
            timed,
            listeners,
            summary,
        }
    }

    fn record(&self, el: &SriElement, duration_ms: f64) -> bool {
        match Sample::new(el.url.clone(), duration_ms, el.integrity.clone(), Utc::now()) {
            Ok(sample) => {
                self.add_sample(sample);
                true
            }
            Err(e) => {
                debug!(element = %el.id, error = %e, "Skipping element with unusable URL");
                self.buffer.mark_dropped();
                false
            }
        }
    }

    fn listen(&self, el: SriElement) -> JoinHandle<()> {
        let watch = self.dom.watch_load(el.id);
        let buffer = Arc::clone(&self.buffer);
        let log = self.config.enable_logging;
        let started = Instant::now();

        tokio::spawn(async move {
            if watch.await != LoadOutcome::Loaded {
                if log {
                    debug!(url = %el.url, "Resource failed to load, no sample recorded");
                }
                buffer.mark_dropped();
                return;
            }
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            match Sample::new(el.url, duration_ms, el.integrity, Utc::now()) {
                Ok(sample) => buffer.push(sample),
                Err(e) => {
                    debug!(element = %el.id, error = %e, "Skipping element with unusable URL");
                    buffer.mark_dropped();
                }
            }
        })
    }
}
