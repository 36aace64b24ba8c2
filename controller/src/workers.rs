//! Fixed worker pool with a per-key dedup queue (§5): bounded concurrency across reconciles of
//! one object kind, with repeat enqueues for a key that's still waiting collapsed into one.
//! Strict serialization of a single key *while it's running* is not attempted here — two
//! workers can race on the same key if a fresh enqueue lands mid-run — but that's safe because
//! every reconcile patches through [`ObjectStore::patch`](crate::store::ObjectStore::patch)'s
//! resource-version check: the loser gets `StoreError::Conflict` and requeues rather than
//! clobbering the winner.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub type Key = (String, String);

#[derive(Clone)]
pub struct ReconcileQueue {
    tx: mpsc::UnboundedSender<Key>,
    queued: Arc<DashSet<Key>>,
}

impl ReconcileQueue {
    /// Spawns `worker_count` tasks draining one shared queue. `handler` returns `Some(delay)` to
    /// requeue the same key after `delay` (a Pending lease polling for a busy exporter to free
    /// up, say), or `None` once the object has reached a terminal or stable state.
    pub fn spawn<F, Fut>(worker_count: usize, cancel: CancellationToken, handler: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Duration>> + Send,
    {
        let (tx, rx) = mpsc::unbounded_channel::<Key>();
        let rx = Arc::new(Mutex::new(rx));
        let queued = Arc::new(DashSet::new());
        let handler = Arc::new(handler);

        for _ in 0..worker_count.max(1) {
            let rx = rx.clone();
            let queued = queued.clone();
            let handler = handler.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let key = tokio::select! {
                        _ = cancel.cancelled() => return,
                        key = async {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        } => match key {
                            Some(k) => k,
                            None => return,
                        },
                    };
                    queued.remove(&key);
                    if let Some(requeue_after) = handler(key.0.clone(), key.1.clone()).await {
                        let tx = tx.clone();
                        let queued = queued.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                _ = sleep(requeue_after) => {
                                    if queued.insert(key.clone()) {
                                        let _ = tx.send(key);
                                    }
                                }
                            }
                        });
                    }
                }
            });
        }

        Self { tx, queued }
    }

    /// Enqueue `(namespace, name)` unless a reconcile for that key is already waiting.
    pub fn enqueue(&self, namespace: impl Into<String>, name: impl Into<String>) {
        let key = (namespace.into(), name.into());
        if self.queued.insert(key.clone()) {
            let _ = self.tx.send(key);
        }
    }
}
