//! Test doubles shared by the unit tests of several modules

use crate::collector::{ResourceTiming, TimingError, TimingSource};
use crate::dom::{Dom, DomError, ElementId, ElementSpec, LoadNotifier, LoadOutcome, LoadWatch, SriElement};
use crate::models::ResourceKind;
use crate::storage::{KvStore, MemoryStore, Partition, StorageError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

struct FakeNode {
    spec: ElementSpec,
    attached: bool,
}

#[derive(Default)]
struct FakeState {
    nodes: BTreeMap<ElementId, FakeNode>,
    order: Vec<ElementId>,
    next_id: u64,
    responses: HashMap<String, LoadOutcome>,
    waiting: HashMap<ElementId, Vec<LoadNotifier>>,
    refuse_attach_by_replace: HashSet<ElementId>,
    refuse_removal: HashSet<ElementId>,
}

impl FakeState {
    fn node(&self, id: ElementId) -> Result<&FakeNode, DomError> {
        self.nodes.get(&id).ok_or(DomError::UnknownElement(id))
    }

    fn create(&mut self, spec: ElementSpec, attached: bool) -> ElementId {
        self.next_id += 1;
        let id = ElementId(self.next_id);
        self.nodes.insert(id, FakeNode { spec, attached });
        if attached {
            self.order.push(id);
        }
        id
    }
}

/// Scriptable in-memory document
#[derive(Default)]
pub(crate) struct FakeDom {
    state: Mutex<FakeState>,
}

impl FakeDom {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append an attached resource element to the document
    pub(crate) fn add_resource(
        &self,
        kind: ResourceKind,
        url: &str,
        integrity: Option<&str>,
    ) -> ElementId {
        let rel = match kind {
            ResourceKind::Script => None,
            ResourceKind::Stylesheet => Some("stylesheet".to_string()),
            ResourceKind::Icon => Some("icon".to_string()),
        };
        let spec = ElementSpec {
            kind,
            url: url.to_string(),
            integrity: integrity.map(str::to_string),
            cross_origin: None,
            rel,
        };
        self.state.lock().unwrap().create(spec, true)
    }

    /// Watches on elements loading `url` resolve immediately with `outcome`
    pub(crate) fn respond(&self, url: &str, outcome: LoadOutcome) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(url.to_string(), outcome);
    }

    /// Resolve every pending watch of `id`
    pub(crate) fn fire(&self, id: ElementId, outcome: LoadOutcome) {
        let notifiers = self.state.lock().unwrap().waiting.remove(&id);
        for n in notifiers.into_iter().flatten() {
            n.resolve(outcome);
        }
    }

    /// Resolve every pending watch in the document
    pub(crate) fn fire_all(&self, outcome: LoadOutcome) {
        let waiting = std::mem::take(&mut self.state.lock().unwrap().waiting);
        for n in waiting.into_values().flatten() {
            n.resolve(outcome);
        }
    }

    /// URLs of attached elements in document order
    pub(crate) fn attached_urls(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .order
            .iter()
            .map(|id| state.nodes[id].spec.url.clone())
            .collect()
    }

    pub(crate) fn is_attached(&self, id: ElementId) -> bool {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(&id)
            .map(|n| n.attached)
            .unwrap_or(false)
    }

    /// Spec of an element, attached or not
    pub(crate) fn spec_of(&self, id: ElementId) -> Option<ElementSpec> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(&id)
            .map(|n| n.spec.clone())
    }

    /// Make `replace(_, id)` fail, as when the swap target was moved by
    /// page script
    pub(crate) fn refuse_replace_with(&self, id: ElementId) {
        self.state.lock().unwrap().refuse_attach_by_replace.insert(id);
    }

    /// Make `remove(id)` fail
    pub(crate) fn refuse_removal_of(&self, id: ElementId) {
        self.state.lock().unwrap().refuse_removal.insert(id);
    }

    pub(crate) fn element_count(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }
}

impl Dom for FakeDom {
    fn sri_elements(&self) -> Vec<SriElement> {
        let state = self.state.lock().unwrap();
        state
            .order
            .iter()
            .filter_map(|id| {
                let spec = &state.nodes[id].spec;
                spec.integrity.as_ref().map(|_| SriElement {
                    id: *id,
                    kind: spec.kind,
                    url: spec.url.clone(),
                    integrity: spec.integrity.clone(),
                    rel: spec.rel.clone(),
                })
            })
            .collect()
    }

    fn create_element(&self, spec: ElementSpec) -> Result<ElementId, DomError> {
        Ok(self.state.lock().unwrap().create(spec, false))
    }

    fn insert_after(&self, anchor: ElementId, element: ElementId) -> Result<(), DomError> {
        let mut state = self.state.lock().unwrap();
        if !state.node(anchor)?.attached {
            return Err(DomError::Detached(anchor));
        }
        if state.node(element)?.attached {
            return Err(DomError::AlreadyAttached(element));
        }
        let pos = state.order.iter().position(|id| *id == anchor).unwrap();
        state.order.insert(pos + 1, element);
        state.nodes.get_mut(&element).unwrap().attached = true;
        Ok(())
    }

    fn replace(&self, old: ElementId, new: ElementId) -> Result<(), DomError> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_attach_by_replace.contains(&new) {
            return Err(DomError::Detached(old));
        }
        if !state.node(old)?.attached {
            return Err(DomError::Detached(old));
        }
        if state.node(new)?.attached {
            return Err(DomError::AlreadyAttached(new));
        }
        let pos = state.order.iter().position(|id| *id == old).unwrap();
        state.order[pos] = new;
        state.nodes.get_mut(&old).unwrap().attached = false;
        state.nodes.get_mut(&new).unwrap().attached = true;
        Ok(())
    }

    fn remove(&self, element: ElementId) -> Result<(), DomError> {
        let mut state = self.state.lock().unwrap();
        state.node(element)?;
        if state.refuse_removal.contains(&element) {
            return Err(DomError::UnknownElement(element));
        }
        state.order.retain(|id| *id != element);
        state.nodes.get_mut(&element).unwrap().attached = false;
        Ok(())
    }

    fn watch_load(&self, element: ElementId) -> LoadWatch {
        let mut state = self.state.lock().unwrap();
        let url = match state.nodes.get(&element) {
            Some(node) => node.spec.url.clone(),
            None => return LoadWatch::settled(LoadOutcome::Failed),
        };
        if let Some(outcome) = state.responses.get(&url) {
            return LoadWatch::settled(*outcome);
        }
        let (notifier, watch) = LoadWatch::pending();
        state.waiting.entry(element).or_default().push(notifier);
        watch
    }
}

/// Timing buffer returning canned entries or an error
pub(crate) struct FakeTiming {
    result: Result<Vec<ResourceTiming>, TimingError>,
}

impl FakeTiming {
    pub(crate) fn with_entries(entries: Vec<ResourceTiming>) -> Self {
        Self { result: Ok(entries) }
    }

    pub(crate) fn failing() -> Self {
        Self {
            result: Err(TimingError::Unavailable("performance API missing".to_string())),
        }
    }
}

impl TimingSource for FakeTiming {
    fn list_resource_timings(&self) -> Result<Vec<ResourceTiming>, TimingError> {
        self.result.clone()
    }
}

/// Timing entry for `url` lasting `ms`
pub(crate) fn timing(url: &str, initiator: &str, ms: f64) -> ResourceTiming {
    ResourceTiming {
        name: url.to_string(),
        initiator_type: initiator.to_string(),
        start_time: 100.0,
        response_end: 100.0 + ms,
        duration: ms,
    }
}

/// Memory store with switchable failures, counting batch writes
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    pub(crate) fail_writes: Mutex<HashSet<Partition>>,
    pub(crate) fail_read_keys: Mutex<HashSet<String>>,
    pub(crate) fail_deletes: AtomicBool,
    pub(crate) fail_write_attempts: AtomicUsize,
    pub(crate) batch_writes: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_writes_to(&self, partition: Partition) {
        self.fail_writes.lock().unwrap().insert(partition);
    }

    /// Fail the next `n` batch writes regardless of partition
    pub(crate) fn fail_next_writes(&self, n: usize) {
        self.fail_write_attempts.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_reads_of(&self, key: &str) {
        self.fail_read_keys.lock().unwrap().insert(key.to_string());
    }

    pub(crate) fn batch_writes(&self) -> usize {
        self.batch_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>, StorageError> {
        if self.fail_read_keys.lock().unwrap().contains(key) {
            return Err(StorageError::Unavailable(format!("read of {key} refused")));
        }
        self.inner.get(partition, key).await
    }

    async fn set_batch(
        &self,
        partition: Partition,
        entries: Vec<(String, Value)>,
    ) -> Result<(), StorageError> {
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.lock().unwrap().contains(&partition) {
            return Err(StorageError::Unavailable(format!("{partition} is read-only")));
        }
        let remaining = self.fail_write_attempts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_write_attempts.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Unavailable("transient write failure".to_string()));
        }
        self.inner.set_batch(partition, entries).await
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("delete of {key} refused")));
        }
        self.inner.delete(partition, key).await
    }

    async fn entries(&self, partition: Partition) -> Result<Vec<(String, Value)>, StorageError> {
        self.inner.entries(partition).await
    }

    async fn delete_all(&self) -> Result<(), StorageError> {
        self.inner.delete_all().await
    }
}
