//! Key/value persistence facade
//!
//! The engine never looks storage up globally: a [`KvStore`] implementation
//! is injected at construction time and wrapped in the typed [`Storage`]
//! facade. Two implementations ship with the crate:
//! - [`MemoryStore`] for tests and short-lived hosts
//! - [`JsonFileStore`] persisting every partition to one JSON file

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use crate::models::{integrity_key, stats_key, HostStats, IntegrityEntry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Storage partitions (object stores)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Per-host latency statistics
    Stats,
    /// Integrity digest → URL index
    IntegrityMap,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Stats, Partition::IntegrityMap];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Stats => "stats",
            Partition::IntegrityMap => "integrity_map",
        }
    }

    pub fn parse(name: &str) -> Option<Partition> {
        Partition::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record {partition}/{key}: {reason}")]
    Corrupt {
        partition: Partition,
        key: String,
        reason: String,
    },
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of an expiry sweep over one or more partitions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Keys deleted, with their partition
    pub removed: Vec<(Partition, String)>,
    /// Partitions or entries that could not be scanned or deleted
    pub failures: usize,
}

impl SweepOutcome {
    pub fn removed_from(&self, partition: Partition) -> usize {
        self.removed.iter().filter(|(p, _)| *p == partition).count()
    }
}

/// Predicate deciding whether a stored record is expired
pub type ExpiryPredicate<'a> = &'a (dyn Fn(Partition, &Value) -> bool + Send + Sync);

/// Raw key/value backend
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read one record
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>, StorageError>;

    /// Write several records in one transaction
    async fn set_batch(
        &self,
        partition: Partition,
        entries: Vec<(String, Value)>,
    ) -> Result<(), StorageError>;

    /// Delete one record; deleting a missing key is not an error
    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StorageError>;

    /// Snapshot every record of a partition
    async fn entries(&self, partition: Partition) -> Result<Vec<(String, Value)>, StorageError>;

    /// Drop every record in every partition
    async fn delete_all(&self) -> Result<(), StorageError>;

    /// Delete every record of `partitions` matching `expired`.
    ///
    /// Backends with transactions override this to cover all partitions in
    /// one scope. The default scans and deletes entry by entry, logging and
    /// continuing past failures.
    async fn sweep(
        &self,
        partitions: &[Partition],
        expired: ExpiryPredicate<'_>,
    ) -> Result<SweepOutcome, StorageError> {
        let mut outcome = SweepOutcome::default();

        for &partition in partitions {
            let entries = match self.entries(partition).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(partition = %partition, error = %e, "Failed to scan partition for expiry");
                    outcome.failures += 1;
                    continue;
                }
            };

            for (key, value) in entries {
                if !expired(partition, &value) {
                    continue;
                }
                match self.delete(partition, &key).await {
                    Ok(()) => outcome.removed.push((partition, key)),
                    Err(e) => {
                        warn!(partition = %partition, key = %key, error = %e, "Failed to delete expired entry");
                        outcome.failures += 1;
                    }
                }
            }
        }

        Ok(outcome)
    }
}

/// Typed facade over a [`KvStore`]
#[derive(Clone)]
pub struct Storage {
    inner: Arc<dyn KvStore>,
}

impl Storage {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self { inner }
    }

    /// Storage backed by a fresh [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// The underlying backend
    pub fn backend(&self) -> &Arc<dyn KvStore> {
        &self.inner
    }

    /// Read the statistics of `host`
    pub async fn get_stats(&self, host: &str) -> Result<Option<HostStats>, StorageError> {
        let key = stats_key(host);
        self.get_typed(Partition::Stats, &key).await
    }

    /// Read the index entry of `digest`
    pub async fn get_integrity(&self, digest: &str) -> Result<Option<IntegrityEntry>, StorageError> {
        let key = integrity_key(digest);
        self.get_typed(Partition::IntegrityMap, &key).await
    }

    /// Write host statistics as one batch
    pub async fn write_stats_batch(&self, records: &[HostStats]) -> Result<(), StorageError> {
        let entries = records
            .iter()
            .map(|r| Ok((r.key.clone(), serde_json::to_value(r)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        self.inner.set_batch(Partition::Stats, entries).await
    }

    /// Write integrity index entries as one batch
    pub async fn write_integrity_batch(
        &self,
        records: &[IntegrityEntry],
    ) -> Result<(), StorageError> {
        let entries = records
            .iter()
            .map(|r| Ok((r.key.clone(), serde_json::to_value(r)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        self.inner.set_batch(Partition::IntegrityMap, entries).await
    }

    /// Every decodable host statistics record
    pub async fn all_stats(&self) -> Result<Vec<HostStats>, StorageError> {
        self.all_typed(Partition::Stats).await
    }

    async fn get_typed<T: serde::de::DeserializeOwned>(
        &self,
        partition: Partition,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.inner.get(partition, key).await? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StorageError::Corrupt {
                    partition,
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    async fn all_typed<T: serde::de::DeserializeOwned>(
        &self,
        partition: Partition,
    ) -> Result<Vec<T>, StorageError> {
        let entries = self.inner.entries(partition).await?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_value(value) {
                Ok(record) => out.push(record),
                Err(e) => warn!(partition = %partition, key = %key, error = %e, "Skipping undecodable record"),
            }
        }
        Ok(out)
    }
}
