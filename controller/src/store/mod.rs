//! Generic declarative object store trait (§2.1): get/list/create/patch/delete/watch against an
//! optimistic-concurrency backing store, implemented once and shared across
//! `Client`/`Exporter`/`Lease`/`ExporterAccessPolicy` without an enum wrapper.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::ObjectMeta;
use crate::selector::Selector;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("resource version conflict on {0}")]
    Conflict(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Other(String),
}

pub trait HasMeta {
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

#[derive(Clone, Debug)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

/// Declarative store: get/list/create/patch/delete/watch with label-selector filtering and
/// resource-version conflict detection on patch. All mutation is idempotent on
/// `resource_version` — a patch whose `expected_resource_version` doesn't match the stored
/// value fails with [`StoreError::Conflict`] rather than silently clobbering a concurrent
/// writer.
#[async_trait]
pub trait ObjectStore<T>: Send + Sync
where
    T: Clone + Send + Sync + HasMeta + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<T, StoreError>;

    async fn list(&self, namespace: &str, selector: &Selector) -> Result<Vec<T>, StoreError>;

    async fn create(&self, obj: T) -> Result<T, StoreError>;

    /// Apply `mutate` to the stored object and persist the result. If
    /// `expected_resource_version` is `Some`, the patch only applies when it matches the
    /// currently stored `resource_version`; otherwise returns [`StoreError::Conflict`] so the
    /// caller can re-read and retry (§4.4.5, §5 ordering guarantees).
    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        expected_resource_version: Option<u64>,
        mutate: Box<dyn FnOnce(&mut T) + Send>,
    ) -> Result<T, StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    async fn watch(&self, namespace: &str) -> tokio::sync::broadcast::Receiver<WatchEvent<T>>;
}
