//! In-memory key/value store

use super::{ExpiryPredicate, KvStore, Partition, StorageError, SweepOutcome};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Partitioned record tables shared by the in-process stores
#[derive(Debug, Default, Clone)]
pub(crate) struct Tables {
    tables: HashMap<Partition, BTreeMap<String, Value>>,
}

impl Tables {
    pub(crate) fn get(&self, partition: Partition, key: &str) -> Option<Value> {
        self.tables.get(&partition).and_then(|t| t.get(key)).cloned()
    }

    pub(crate) fn put_all(&mut self, partition: Partition, entries: Vec<(String, Value)>) {
        let table = self.tables.entry(partition).or_default();
        for (key, value) in entries {
            table.insert(key, value);
        }
    }

    pub(crate) fn remove(&mut self, partition: Partition, key: &str) -> bool {
        self.tables
            .get_mut(&partition)
            .map(|t| t.remove(key).is_some())
            .unwrap_or(false)
    }

    pub(crate) fn entries(&self, partition: Partition) -> Vec<(String, Value)> {
        self.tables
            .get(&partition)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub(crate) fn clear(&mut self) {
        self.tables.clear();
    }

    /// Remove every matching record of `partitions` in one pass
    pub(crate) fn sweep(
        &mut self,
        partitions: &[Partition],
        expired: ExpiryPredicate<'_>,
    ) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        for &partition in partitions {
            if let Some(table) = self.tables.get_mut(&partition) {
                table.retain(|key, value| {
                    if expired(partition, value) {
                        outcome.removed.push((partition, key.clone()));
                        false
                    } else {
                        true
                    }
                });
            }
        }
        outcome
    }

    pub(crate) fn to_json(&self) -> BTreeMap<String, BTreeMap<String, Value>> {
        self.tables
            .iter()
            .map(|(p, t)| (p.as_str().to_string(), t.clone()))
            .collect()
    }

    pub(crate) fn from_json(raw: BTreeMap<String, BTreeMap<String, Value>>) -> (Self, Vec<String>) {
        let mut tables = HashMap::new();
        let mut unknown = Vec::new();
        for (name, table) in raw {
            match Partition::parse(&name) {
                Some(p) => {
                    tables.insert(p, table);
                }
                None => unknown.push(name),
            }
        }
        (Self { tables }, unknown)
    }

    pub(crate) fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }
}

/// Volatile store; every partition lives behind one lock so sweeps are atomic
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across partitions
    pub async fn len(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
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
        self.tables.write().await.put_all(partition, entries);
        Ok(())
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StorageError> {
        self.tables.write().await.remove(partition, key);
        Ok(())
    }

    async fn entries(&self, partition: Partition) -> Result<Vec<(String, Value)>, StorageError> {
        Ok(self.tables.read().await.entries(partition))
    }

    async fn delete_all(&self) -> Result<(), StorageError> {
        self.tables.write().await.clear();
        Ok(())
    }

    async fn sweep(
        &self,
        partitions: &[Partition],
        expired: ExpiryPredicate<'_>,
    ) -> Result<SweepOutcome, StorageError> {
        Ok(self.tables.write().await.sweep(partitions, expired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store
            .set_batch(
                Partition::Stats,
                vec![
                    ("host:a.com".to_string(), json!({"samples": 1})),
                    ("host:b.com".to_string(), json!({"samples": 2})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            store.get(Partition::Stats, "host:a.com").await.unwrap(),
            Some(json!({"samples": 1}))
        );
        // Partitions are independent
        assert_eq!(
            store.get(Partition::IntegrityMap, "host:a.com").await.unwrap(),
            None
        );

        store.delete(Partition::Stats, "host:a.com").await.unwrap();
        store.delete(Partition::Stats, "host:missing").await.unwrap();
        assert_eq!(store.len().await, 1);

        store.delete_all().await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_covers_requested_partitions_only() {
        let store = MemoryStore::new();
        for partition in Partition::ALL {
            store
                .set_batch(
                    partition,
                    vec![
                        ("old".to_string(), json!({"old": true})),
                        ("new".to_string(), json!({"old": false})),
                    ],
                )
                .await
                .unwrap();
        }

        let outcome = store
            .sweep(&[Partition::Stats], &|_, v| v["old"] == json!(true))
            .await
            .unwrap();

        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.failures, 0);
        assert_eq!(store.get(Partition::Stats, "old").await.unwrap(), None);
        assert!(store.get(Partition::Stats, "new").await.unwrap().is_some());
        assert!(store
            .get(Partition::IntegrityMap, "old")
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            assert!(store.is_empty().await);
            assert_eq!(store.get(Partition::Stats, "missing").await.unwrap(), None);
        });
    }
}
