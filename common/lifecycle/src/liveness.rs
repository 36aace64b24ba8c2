//! K8s liveness probe handler.

use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use axum::http::StatusCode;

/// Per-component bookkeeping the manager's internal health monitor polls (§ `Manager::register`
/// with a liveness deadline). Not part of the public API — the monitor owns stall detection and
/// turns a stalled component directly into a [`ComponentEvent::Failure`](crate::handle::ComponentEvent)
/// rather than exposing it through this probe.
#[derive(Clone)]
pub(crate) struct LivenessComponentRef {
    pub tag: String,
    pub healthy_until_ms: Arc<AtomicI64>,
    pub stall_threshold: u32,
}

/// K8s liveness probe handler (`/_liveness`). Intentionally static: always returns 200.
///
/// The manager's own health monitor thread already owns stall detection — once a component
/// misses `stall_threshold` consecutive heartbeats it triggers coordinated graceful shutdown
/// directly (see [`Manager::register`](crate::Manager::register)'s `with_liveness_deadline`).
/// A liveness probe that *also* fails on the same condition just races that decision against a
/// kubelet-initiated `SIGKILL`, which skips the graceful drain entirely. So this handler never
/// fails; only the readiness probe and the manager's own shutdown path matter to K8s here.
#[derive(Clone, Default)]
pub struct LivenessHandler;

impl LivenessHandler {
    pub(crate) fn new() -> Self {
        Self
    }

    pub async fn check(&self) -> StatusCode {
        StatusCode::OK
    }
}
