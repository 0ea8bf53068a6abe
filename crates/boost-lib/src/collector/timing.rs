//! Resource timing entries and per-type summaries

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Upper bound of the fast band (milliseconds)
const FAST_MAX_MS: f64 = 200.0;
/// Upper bound of the moderate band
const MODERATE_MAX_MS: f64 = 500.0;
/// Upper bound of the slow band
const SLOW_MAX_MS: f64 = 1000.0;

/// One entry of the browser's resource timing buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTiming {
    /// Absolute URL of the resource
    pub name: String,
    /// What triggered the fetch (`script`, `link`, `img`, ...)
    #[serde(default)]
    pub initiator_type: String,
    pub start_time: f64,
    pub response_end: f64,
    /// Total entry duration, used when `response_end` is unavailable
    #[serde(default)]
    pub duration: f64,
}

impl ResourceTiming {
    /// Load duration, `response_end - start_time`
    pub fn load_duration(&self) -> f64 {
        if self.response_end > 0.0 {
            self.response_end - self.start_time
        } else {
            self.duration
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimingError {
    #[error("resource timing unavailable: {0}")]
    Unavailable(String),
}

/// Passive resource timing buffer
pub trait TimingSource: Send + Sync {
    fn list_resource_timings(&self) -> Result<Vec<ResourceTiming>, TimingError>;
}

/// Timing source for hosts without a timing buffer; every element falls
/// back to load listeners
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTimings;

impl TimingSource for NoTimings {
    fn list_resource_timings(&self) -> Result<Vec<ResourceTiming>, TimingError> {
        Ok(Vec::new())
    }
}

/// Coarse resource category used in page summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingKind {
    Css,
    Js,
    Image,
}

impl TimingKind {
    /// Categorise an entry by initiator type, then by file extension
    pub fn classify(entry: &ResourceTiming) -> Option<TimingKind> {
        let initiator = entry.initiator_type.to_ascii_lowercase();
        let name = entry.name.as_str();

        if initiator == "link" || initiator == "css" || has_extension(name, &["css"]) {
            Some(TimingKind::Css)
        } else if initiator == "script" || has_extension(name, &["js"]) {
            Some(TimingKind::Js)
        } else if initiator == "img"
            || initiator == "image"
            || has_extension(name, &["png", "jpg", "jpeg", "gif", "svg", "ico"])
        {
            Some(TimingKind::Image)
        } else {
            None
        }
    }
}

/// True when the path of `url` (ignoring query and fragment) ends in one of
/// `exts`
fn has_extension(url: &str, exts: &[&str]) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let Some((_, ext)) = path.rsplit_once('.') else {
        return false;
    };
    exts.iter().any(|e| ext.eq_ignore_ascii_case(e))
}

/// Average load time of one resource category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSummary {
    pub avg_ms: f64,
    pub count: u64,
}

/// Per-category load times for one page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub types: BTreeMap<TimingKind, TypeSummary>,
}

impl TimingSummary {
    pub fn get(&self, kind: TimingKind) -> Option<&TypeSummary> {
        self.types.get(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Summarise timing entries by category, skipping unknown categories and
/// entries without a positive duration
pub fn summarize_timings(entries: &[ResourceTiming]) -> TimingSummary {
    let mut acc: BTreeMap<TimingKind, (f64, u64)> = BTreeMap::new();

    for entry in entries {
        let duration = entry.load_duration();
        if !(duration > 0.0) {
            continue;
        }
        let Some(kind) = TimingKind::classify(entry) else {
            continue;
        };
        let slot = acc.entry(kind).or_insert((0.0, 0));
        slot.0 += duration;
        slot.1 += 1;
    }

    TimingSummary {
        types: acc
            .into_iter()
            .map(|(kind, (sum, count))| {
                (
                    kind,
                    TypeSummary {
                        avg_ms: sum / count as f64,
                        count,
                    },
                )
            })
            .collect(),
    }
}

/// Qualitative latency band for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyBand {
    Fast,
    Moderate,
    Slow,
    Critical,
}

impl LatencyBand {
    pub fn classify(ms: f64) -> LatencyBand {
        if ms <= FAST_MAX_MS {
            LatencyBand::Fast
        } else if ms <= MODERATE_MAX_MS {
            LatencyBand::Moderate
        } else if ms <= SLOW_MAX_MS {
            LatencyBand::Slow
        } else {
            LatencyBand::Critical
        }
    }
}

impl std::fmt::Display for LatencyBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LatencyBand::Fast => write!(f, "fast"),
            LatencyBand::Moderate => write!(f, "moderate"),
            LatencyBand::Slow => write!(f, "slow"),
            LatencyBand::Critical => write!(f, "critical"),
        }
    }
}
