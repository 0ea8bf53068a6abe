//! Core data models for the boost engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Prefix of host statistics keys
pub const HOST_KEY_PREFIX: &str = "host:";

/// Prefix of integrity index keys
pub const INTEGRITY_KEY_PREFIX: &str = "integrity:";

/// Storage key for a host's statistics
pub fn stats_key(host: &str) -> String {
    format!("{HOST_KEY_PREFIX}{host}")
}

/// Storage key for an integrity digest's index entry
pub fn integrity_key(digest: &str) -> String {
    format!("{INTEGRITY_KEY_PREFIX}{digest}")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("not an absolute URL with a host: {0}")]
    InvalidUrl(String),
}

/// Host part of an absolute URL, including an explicit non-default port.
pub fn host_of(url: &str) -> Result<String, ModelError> {
    let parsed = Url::parse(url).map_err(|_| ModelError::InvalidUrl(url.to_string()))?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ModelError::InvalidUrl(url.to_string()))?;

    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Kind of SRI-protected resource found on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// `<script src integrity>`
    Script,
    /// `<link rel=stylesheet href integrity>`
    Stylesheet,
    /// `<link rel~=icon href integrity>`
    Icon,
}

impl ResourceKind {
    /// HTML tag used for this kind of resource
    pub fn tag(&self) -> &'static str {
        match self {
            ResourceKind::Script => "script",
            ResourceKind::Stylesheet | ResourceKind::Icon => "link",
        }
    }
}

/// One observed resource load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub url: String,
    pub host: String,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl Sample {
    /// Build a sample, deriving the host from `url`.
    ///
    /// Negative or non-finite durations are stored as 0.
    pub fn new(
        url: impl Into<String>,
        duration_ms: f64,
        integrity: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        let url = url.into();
        let host = host_of(&url)?;
        let duration_ms = if duration_ms.is_finite() {
            duration_ms.max(0.0)
        } else {
            0.0
        };

        Ok(Self {
            url,
            host,
            duration_ms,
            timestamp,
            integrity: integrity.filter(|i| !i.is_empty()),
        })
    }
}

/// Running latency aggregate for one host, stored under `host:<host>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
    pub key: String,
    pub host: String,
    pub samples: u64,
    pub avg_ms: f64,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
}

impl HostStats {
    /// Fold a group of `count` durations summing to `sum_ms` into `existing`.
    ///
    /// The mean is updated incrementally: `(avg * n + sum) / (n + count)`.
    /// A host seen for the first time starts with `first_at = last_at = now`.
    pub fn fold(
        existing: Option<&HostStats>,
        host: &str,
        sum_ms: f64,
        count: u64,
        now: DateTime<Utc>,
    ) -> HostStats {
        match existing {
            Some(prev) if prev.samples > 0 => {
                let total = prev.samples + count;
                HostStats {
                    key: stats_key(host),
                    host: host.to_string(),
                    samples: total,
                    avg_ms: (prev.avg_ms * prev.samples as f64 + sum_ms) / total as f64,
                    first_at: prev.first_at,
                    last_at: now,
                }
            }
            _ => HostStats {
                key: stats_key(host),
                host: host.to_string(),
                samples: count,
                avg_ms: if count == 0 { 0.0 } else { sum_ms / count as f64 },
                first_at: existing.map(|p| p.first_at).unwrap_or(now),
                last_at: now,
            },
        }
    }

    /// True when the average marks this host as slow
    pub fn is_slow(&self, threshold_ms: f64) -> bool {
        self.samples > 0 && self.avg_ms >= threshold_ms
    }
}

/// Known locations of one SRI digest, stored under `integrity:<digest>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityEntry {
    pub key: String,
    pub integrity: String,
    pub urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl IntegrityEntry {
    /// Union `urls` into `existing`, keeping first-seen order and `created_at`.
    pub fn fold<'a>(
        existing: Option<IntegrityEntry>,
        digest: &str,
        urls: impl IntoIterator<Item = &'a str>,
        now: DateTime<Utc>,
    ) -> IntegrityEntry {
        let mut entry = existing.unwrap_or_else(|| IntegrityEntry {
            key: integrity_key(digest),
            integrity: digest.to_string(),
            urls: Vec::new(),
            created_at: now,
            last_seen_at: now,
        });

        // Older records may carry duplicates; normalise on every write.
        let mut seen = std::collections::HashSet::new();
        entry.urls.retain(|u| seen.insert(u.clone()));

        for url in urls {
            if seen.insert(url.to_string()) {
                entry.urls.push(url.to_string());
            }
        }

        entry.key = integrity_key(digest);
        entry.integrity = digest.to_string();
        entry.last_seen_at = now;
        entry
    }
}
