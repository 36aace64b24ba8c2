//! Component handle and lifecycle events.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sentinel `healthy_until_ms` value for a component that has registered but never called
/// [`Handle::report_healthy`].
pub(crate) const HEALTH_STARTING: i64 = 0;
/// Sentinel `healthy_until_ms` value for a component that called [`Handle::report_unhealthy`].
pub(crate) const HEALTH_UNHEALTHY: i64 = -1;

#[derive(Debug)]
pub(crate) enum ComponentEvent {
    Failure { tag: String, reason: String },
    ShutdownRequested { tag: String },
    WorkCompleted { tag: String },
    Died { tag: String },
}

/// RAII handle for a registered component. Clone and pass to tasks.
///
/// **Drop guard:** When the last clone of a handle is dropped, the manager is notified. If
/// shutdown is already in progress ([`is_shutting_down`](Handle::is_shutting_down)), the drop
/// is treated as normal completion (equivalent to [`work_completed`](Handle::work_completed)).
/// If shutdown is not in progress, the drop signals "component died" and triggers shutdown.
/// So for long-running components that exit when they see shutdown, just return (drop the
/// handle); no need to call `work_completed()`. Call `work_completed()` for one-shot/finite
/// work or when signaling done without dropping.
///
/// **`process_scope` guard:** the recommended pattern is to hold `Handle` as a struct field
/// (so child methods can freely call `report_healthy`/`shutdown_recv`) and create a
/// [`process_scope`](Handle::process_scope) guard at the top of the component's `process()`
/// loop. The guard ties lifecycle signaling to that function returning, not to the struct's
/// (and hence the handle clone's) lifetime — which matters because the struct, and the handle
/// it owns, may well outlive `process()` returning.
#[derive(Clone)]
pub struct Handle {
    pub(crate) inner: Arc<HandleInner>,
}

pub struct HandleInner {
    pub(crate) tag: String,
    pub(crate) shutdown_token: CancellationToken,
    pub(crate) event_tx: Arc<OnceLock<mpsc::Sender<ComponentEvent>>>,
    pub(crate) healthy_until_ms: Arc<AtomicI64>,
    pub(crate) liveness_deadline: Option<Duration>,
    pub(crate) completed: AtomicBool,
    pub(crate) process_scope_signalled: AtomicBool,
}

impl HandleInner {
    fn send(&self, event: ComponentEvent) {
        if let Some(tx) = self.event_tx.get() {
            drop(tx.try_send(event));
        }
    }

    /// Signals exit exactly once, whichever of {process_scope guard drop, handle drop,
    /// explicit `work_completed`} gets there first. Subsequent callers are no-ops.
    fn signal_exit_once(&self) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        let event = if self.shutdown_token.is_cancelled() {
            ComponentEvent::WorkCompleted {
                tag: self.tag.clone(),
            }
        } else {
            ComponentEvent::Died {
                tag: self.tag.clone(),
            }
        };
        self.send(event);
    }
}

impl Handle {
    /// Future that resolves when shutdown begins. Use in `tokio::select!` to detect shutdown.
    pub fn shutdown_recv(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.inner.shutdown_token.cancelled()
    }

    /// Clone of the underlying cancellation token for passing to sub-tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.shutdown_token.clone()
    }

    /// Returns true if shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown_token.is_cancelled()
    }

    /// Signal a fatal error; triggers global shutdown.
    pub fn signal_failure(&self, reason: impl Into<String>) {
        self.inner.send(ComponentEvent::Failure {
            tag: self.inner.tag.clone(),
            reason: reason.into(),
        });
    }

    /// Request a clean shutdown (non-fatal).
    pub fn request_shutdown(&self) {
        self.inner.send(ComponentEvent::ShutdownRequested {
            tag: self.inner.tag.clone(),
        });
    }

    /// Mark this component as finished. Required for one-shot/finite work (e.g. migration runner)
    /// or when signaling done without dropping the handle. Optional for long-running components
    /// that exit on shutdown — dropping the handle (or the `process_scope` guard) during
    /// shutdown is treated as completion.
    pub fn work_completed(&self) {
        if self.inner.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.send(ComponentEvent::WorkCompleted {
            tag: self.inner.tag.clone(),
        });
    }

    /// Report healthy; must be called more often than the configured liveness deadline.
    pub fn report_healthy(&self) {
        if let Some(deadline) = self.inner.liveness_deadline {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64;
            let until = now_ms.saturating_add(deadline.as_millis() as i64);
            self.inner.healthy_until_ms.store(until, Ordering::Relaxed);
        }
    }

    /// Report this component as unhealthy for liveness (stored as -1 so the health monitor
    /// treats it as stalled immediately rather than "starting").
    pub fn report_unhealthy(&self) {
        self.inner.healthy_until_ms.store(HEALTH_UNHEALTHY, Ordering::Relaxed);
    }

    /// Same as [`report_healthy`](Handle::report_healthy); safe to call from sync/blocking contexts (e.g. rdkafka callbacks).
    pub fn report_healthy_blocking(&self) {
        self.report_healthy();
    }

    /// Ties lifecycle signaling to the scope of the caller's `process()` function: dropping
    /// the returned guard signals completion (if shutdown is underway) or an unexpected exit
    /// (if not), exactly once, regardless of how many `Handle` clones are still held elsewhere.
    pub fn process_scope(&self) -> ProcessScopeGuard {
        ProcessScopeGuard {
            inner: self.inner.clone(),
        }
    }
}

/// RAII guard from [`Handle::process_scope`]; see that method's docs.
pub struct ProcessScopeGuard {
    inner: Arc<HandleInner>,
}

impl Drop for ProcessScopeGuard {
    fn drop(&mut self) {
        self.inner.process_scope_signalled.store(true, Ordering::SeqCst);
        self.inner.signal_exit_once();
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.signal_exit_once();
    }
}
