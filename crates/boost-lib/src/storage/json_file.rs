//! JSON file backed key/value store
//!
//! Keeps every partition in memory and rewrites the whole file after each
//! mutation. Writes go to a temporary sibling first and are renamed into
//! place, so a crash never leaves a half-written file behind.

use super::memory::Tables;
use super::{ExpiryPredicate, KvStore, Partition, StorageError, SweepOutcome};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Persistent store writing all partitions to a single JSON document
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    tables: RwLock<Tables>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing data if the file exists
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let tables = if tokio::fs::try_exists(&path).await? {
            Self::load(&path).await?
        } else {
            Tables::default()
        };

        Ok(Self {
            path,
            tables: RwLock::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> Result<Tables, StorageError> {
        let data = tokio::fs::read(path).await?;
        if data.is_empty() {
            return Ok(Tables::default());
        }
        let raw = serde_json::from_slice(&data)?;
        let (tables, unknown) = Tables::from_json(raw);
        for name in unknown {
            warn!(path = %path.display(), partition = %name, "Ignoring unknown partition in store file");
        }
        info!(path = %path.display(), records = tables.len(), "Loaded store from disk");
        Ok(tables)
    }

    async fn persist(&self, tables: &Tables) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec(&tables.to_json())?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), records = tables.len(), "Store flushed to disk");
        Ok(())
    }

    /// Apply `mutate` and persist; the in-memory state is rolled back if the
    /// write fails so memory and disk never diverge.
    async fn mutate<R>(&self, mutate: impl FnOnce(&mut Tables) -> R) -> Result<R, StorageError> {
        let mut tables = self.tables.write().await;
        let snapshot = tables.clone();
        let result = mutate(&mut tables);
        if let Err(e) = self.persist(&tables).await {
            *tables = snapshot;
            return Err(e);
        }
        Ok(result)
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.tables.read().await.get(partition, key))
    }

    async fn set_batch(
        &self,
        partition: Partition,
        entries: Vec<(String, Value)>,
    ) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.mutate(|t| t.put_all(partition, entries)).await
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StorageError> {
        if self.tables.read().await.get(partition, key).is_none() {
            return Ok(());
        }
        self.mutate(|t| {
            t.remove(partition, key);
        })
        .await
    }

    async fn entries(&self, partition: Partition) -> Result<Vec<(String, Value)>, StorageError> {
        Ok(self.tables.read().await.entries(partition))
    }

    async fn delete_all(&self) -> Result<(), StorageError> {
        self.mutate(Tables::clear).await
    }

    async fn sweep(
        &self,
        partitions: &[Partition],
        expired: ExpiryPredicate<'_>,
    ) -> Result<SweepOutcome, StorageError> {
        self.mutate(|t| t.sweep(partitions, expired)).await
    }
}
