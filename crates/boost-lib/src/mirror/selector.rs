//! Mirror candidate selection

use crate::config::BoostConfig;
use crate::dom::SriElement;
use crate::models::{host_of, IntegrityEntry, ModelError};
use crate::storage::{Storage, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error(transparent)]
    Url(#[from] ModelError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Everything known about alternatives for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorLookup {
    pub host: String,
    /// Average load time of `host`, if any samples exist
    pub avg_ms: Option<f64>,
    pub samples: u64,
    /// Whether `host` is at or above the slow threshold
    pub slow: bool,
    /// Other-host URLs serving the same digest, in index order
    pub candidates: Vec<String>,
}

/// Why an element was not given a replacement attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    NoDigest,
    InvalidUrl,
    NoStats,
    Fast { avg_ms: f64 },
    NoCandidate,
    StorageError,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoDigest => "no_digest",
            SkipReason::InvalidUrl => "invalid_url",
            SkipReason::NoStats => "no_stats",
            SkipReason::Fast { .. } => "fast",
            SkipReason::NoCandidate => "no_candidate",
            SkipReason::StorageError => "storage_error",
        }
    }
}

/// Result of gating and lookup for one element
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Skipped(SkipReason),
    Candidates { avg_ms: f64, urls: Vec<String> },
}

/// Other-host URLs of `entry` usable in place of a resource on
/// `original_host`.
///
/// Returns nothing when the entry belongs to another digest.
pub fn filter_candidates(entry: &IntegrityEntry, digest: &str, original_host: &str) -> Vec<String> {
    if entry.integrity != digest {
        return Vec::new();
    }
    entry
        .urls
        .iter()
        .filter(|url| match host_of(url) {
            Ok(host) => host != original_host,
            Err(_) => false,
        })
        .cloned()
        .collect()
}

/// Decides whether a resource is slow and which mirrors could replace it
#[derive(Clone)]
pub struct MirrorSelector {
    storage: Storage,
    threshold_ms: f64,
    log: bool,
}

impl MirrorSelector {
    pub fn new(config: &BoostConfig, storage: Storage) -> Self {
        Self {
            storage,
            threshold_ms: config.threshold_ms,
            log: config.enable_logging,
        }
    }

    pub fn threshold_ms(&self) -> f64 {
        self.threshold_ms
    }

    /// Host speed and candidates for a resource, without gating
    pub async fn lookup(&self, digest: &str, url: &str) -> Result<MirrorLookup, SelectorError> {
        let host = host_of(url)?;
        let stats = self.storage.get_stats(&host).await?;
        let candidates = match self.storage.get_integrity(digest).await? {
            Some(entry) => filter_candidates(&entry, digest, &host),
            None => Vec::new(),
        };

        Ok(MirrorLookup {
            slow: stats
                .as_ref()
                .map(|s| s.is_slow(self.threshold_ms))
                .unwrap_or(false),
            avg_ms: stats.as_ref().map(|s| s.avg_ms),
            samples: stats.map(|s| s.samples).unwrap_or(0),
            host,
            candidates,
        })
    }

    /// Gate `element` on its host's speed and list its candidates
    pub async fn select(&self, element: &SriElement) -> Selection {
        let Some(digest) = element.integrity.as_deref() else {
            return Selection::Skipped(SkipReason::NoDigest);
        };

        let host = match element.host() {
            Ok(host) => host,
            Err(_) => return Selection::Skipped(SkipReason::InvalidUrl),
        };

        let stats = match self.storage.get_stats(&host).await {
            Ok(Some(stats)) => stats,
            Ok(None) => return Selection::Skipped(SkipReason::NoStats),
            Err(e) => {
                warn!(host = %host, error = %e, "Failed to read host stats");
                return Selection::Skipped(SkipReason::StorageError);
            }
        };

        if !stats.is_slow(self.threshold_ms) {
            return Selection::Skipped(SkipReason::Fast {
                avg_ms: stats.avg_ms,
            });
        }

        let entry = match self.storage.get_integrity(digest).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Selection::Skipped(SkipReason::NoCandidate),
            Err(e) => {
                warn!(integrity = %digest, error = %e, "Failed to read integrity entry");
                return Selection::Skipped(SkipReason::StorageError);
            }
        };

        let urls = filter_candidates(&entry, digest, &host);
        if urls.is_empty() {
            return Selection::Skipped(SkipReason::NoCandidate);
        }

        if self.log {
            debug!(
                url = %element.url,
                avg_ms = stats.avg_ms,
                candidates = urls.len(),
                "Slow resource has mirror candidates"
            );
        }

        Selection::Candidates {
            avg_ms: stats.avg_ms,
            urls,
        }
    }
}
