//! In-memory sample buffer
//!
//! Samples accumulate here until the aggregation cycle drains them. The
//! buffer is unbounded until drained; a drain swaps the contents out under
//! the lock so readers never see a half-emptied buffer.

use crate::models::Sample;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Buffer of samples waiting for aggregation
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Mutex<Vec<Sample>>,
    /// Samples ever pushed
    pushed: AtomicU64,
    /// Detected resources that settled without producing a sample
    dropped: AtomicU64,
}

/// Counters describing the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    /// Samples currently buffered
    pub pending: usize,
    /// Samples pushed since creation
    pub total_pushed: u64,
    /// Resources that finished loading, or failed to, without a sample
    pub dropped: u64,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sample>> {
        // A panic while holding the lock cannot leave a Vec half-written
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a sample
    pub fn push(&self, sample: Sample) {
        self.lock().push(sample);
        self.pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a resource that will never produce a sample
    pub fn mark_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Empty the buffer and return its prior contents
    pub fn drain(&self) -> Vec<Sample> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pending: self.len(),
            total_pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn sample(url: &str, ms: f64) -> Sample {
        Sample::new(url, ms, Some("sha256-X".to_string()), Utc::now()).unwrap()
    }

    #[test]
    fn test_push_and_drain() {
        let buffer = SampleBuffer::new();
        buffer.push(sample("https://a.com/1.js", 10.0));
        buffer.push(sample("https://a.com/2.js", 20.0));
        assert_eq!(buffer.len(), 2);

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].url, "https://a.com/1.js");
        assert!(buffer.is_empty());

        // Draining an empty buffer yields nothing
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_stats_count_total_pushed() {
        let buffer = SampleBuffer::new();
        buffer.push(sample("https://a.com/1.js", 1.0));
        buffer.push(sample("https://a.com/2.js", 2.0));
        buffer.mark_dropped();
        buffer.drain();

        let stats = buffer.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.total_pushed, 2);
        // Dropped resources are counted apart from samples
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_concurrent_push_and_drain_loses_nothing() {
        let buffer = Arc::new(SampleBuffer::new());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        buffer.push(sample(&format!("https://h{w}.com/{i}.js"), i as f64));
                    }
                })
            })
            .collect();

        let mut drained = 0;
        while writers.iter().any(|w| !w.is_finished()) {
            drained += buffer.drain().len();
        }
        for w in writers {
            w.join().unwrap();
        }
        drained += buffer.drain().len();

        assert_eq!(drained, 1000);
    }
}
