//! The lease scheduler: time-field reconciliation, the state machine, exporter selection
//! ordering, and the reconcile loop tying them together against an [`ObjectStore`](crate::store::ObjectStore).

mod reconciler;
mod selection;
mod time;

pub use reconciler::{reconcile_once, LeaseReconcileOutcome};
pub use selection::{assignable, order_candidates};
pub use time::{reconcile_time_fields, NormalizedTime};

use thiserror::Error;

/// Internal reconcile-loop error. Never crosses the RPC boundary directly; reconcilers
/// translate these into Lease/Exporter status conditions and requeue (§7 propagation rule).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("store error: {0}")]
    Store(String),
}

impl From<crate::store::StoreError> for ReconcileError {
    fn from(err: crate::store::StoreError) -> Self {
        ReconcileError::Store(err.to_string())
    }
}

impl From<crate::selector::SelectorError> for ReconcileError {
    fn from(err: crate::selector::SelectorError) -> Self {
        ReconcileError::Invalid(err.to_string())
    }
}
