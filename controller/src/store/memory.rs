//! In-memory [`ObjectStore`] implementation. Good enough for a single controller replica and
//! for tests; a future CRD-backed store implements the same trait.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::selector::Selector;

use super::{HasMeta, ObjectStore, StoreError, WatchEvent};

type Key = (String, String);

pub struct MemoryStore<T> {
    objects: DashMap<Key, T>,
    events: broadcast::Sender<WatchEvent<T>>,
}

impl<T> Default for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            objects: DashMap::new(),
            events: tx,
        }
    }
}

impl<T> MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T> ObjectStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + HasMeta + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<T, StoreError> {
        self.objects
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::NotFound(format!("{namespace}/{name}")))
    }

    async fn list(&self, namespace: &str, selector: &Selector) -> Result<Vec<T>, StoreError> {
        Ok(self
            .objects
            .iter()
            .filter(|entry| {
                let meta = entry.value().meta();
                meta.namespace == namespace && selector.matches(&meta.labels)
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create(&self, obj: T) -> Result<T, StoreError> {
        let key = (obj.meta().namespace.clone(), obj.meta().name.clone());
        match self.objects.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::AlreadyExists(format!(
                "{}/{}",
                obj.meta().namespace,
                obj.meta().name
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let mut obj = obj;
                obj.meta_mut().resource_version = 1;
                slot.insert(obj.clone());
                drop(self.events.send(WatchEvent::Added(obj.clone())));
                Ok(obj)
            }
        }
    }

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        expected_resource_version: Option<u64>,
        mutate: Box<dyn FnOnce(&mut T) + Send>,
    ) -> Result<T, StoreError> {
        let key = (namespace.to_string(), name.to_string());
        let mut entry = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("{namespace}/{name}")))?;

        if let Some(expected) = expected_resource_version {
            if entry.meta().resource_version != expected {
                return Err(StoreError::Conflict(format!("{namespace}/{name}")));
            }
        }

        mutate(&mut entry);
        entry.meta_mut().resource_version += 1;
        let updated = entry.clone();
        drop(entry);
        drop(self.events.send(WatchEvent::Modified(updated.clone())));
        Ok(updated)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = (namespace.to_string(), name.to_string());
        match self.objects.remove(&key) {
            Some((_, obj)) => {
                drop(self.events.send(WatchEvent::Deleted(obj)));
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("{namespace}/{name}"))),
        }
    }

    async fn watch(&self, _namespace: &str) -> broadcast::Receiver<WatchEvent<T>> {
        self.events.subscribe()
    }
}

impl<T> MemoryStore<T>
where
    T: Clone + Send + Sync + HasMeta + 'static,
{
    /// Convenience for tests and bootstrap seeding: insert or overwrite without the
    /// create-only `AlreadyExists` check, keeping whatever `resource_version` is already set.
    pub fn seed(self: &Arc<Self>, obj: T) {
        let key = (obj.meta().namespace.clone(), obj.meta().name.clone());
        self.objects.insert(key, obj);
    }
}
