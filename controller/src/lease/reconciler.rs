//! The lease reconcile loop (§4.4.2-§4.4.5): ties time reconciliation, the policy engine, and
//! selection ordering together against the [`ObjectStore`].

use std::time::Duration as StdDuration;

use chrono::Utc;

use crate::model::{
    condition_true, set_condition, Condition, Lease, CONDITION_INVALID, CONDITION_PENDING,
    CONDITION_READY, CONDITION_UNSATISFIABLE, LABEL_LEASE_ENDED,
};
use crate::policy::approved_exporters_for;
use crate::selector::parse_selector;
use crate::store::{ObjectStore, StoreError};

use super::selection::{assignable, order_candidates};
use super::time::reconcile_time_fields;
use super::ReconcileError;

/// Default poll interval for a Pending lease whose eligible exporters are all currently busy
/// or offline. Not specified by the core; picked as a reasonable controller-runtime-style
/// requeue default (see DESIGN.md decisions for the other two open scheduling questions this
/// mirrors).
const PENDING_REQUEUE: StdDuration = StdDuration::from_secs(5);

#[derive(Clone, Debug)]
pub struct LeaseReconcileOutcome {
    pub lease: Lease,
    pub requeue_after: Option<StdDuration>,
}

fn set_terminal_condition(lease: &mut Lease, active: &str, reason: &str, message: &str) {
    for kind in [
        CONDITION_INVALID,
        CONDITION_UNSATISFIABLE,
        CONDITION_PENDING,
        CONDITION_READY,
    ] {
        let status = kind == active;
        let (r, m) = if status {
            (reason.to_string(), message.to_string())
        } else {
            (String::new(), String::new())
        };
        set_condition(&mut lease.status.conditions, Condition::new(kind, status, r, m));
    }
}

pub async fn reconcile_once(
    leases: &dyn ObjectStore<Lease>,
    exporters: &dyn ObjectStore<crate::model::Exporter>,
    clients: &dyn ObjectStore<crate::model::Client>,
    policy_docs: &dyn ObjectStore<crate::model::ExporterAccessPolicy>,
    namespace: &str,
    name: &str,
) -> Result<LeaseReconcileOutcome, ReconcileError> {
    let lease = leases.get(namespace, name).await?;

    if lease.status.ended {
        // Monotonic: once ended, no further condition changes are emitted (§5).
        return Ok(LeaseReconcileOutcome {
            lease,
            requeue_after: None,
        });
    }

    // Exporter disappearance detection (§4.4.5) takes priority over everything else: if we're
    // bound and the exporter is gone, end immediately with reason ExporterGone.
    if let Some(exporter_name) = lease.status.exporter_ref.clone() {
        if exporters.get(namespace, &exporter_name).await.is_err() {
            return end_lease(leases, exporters, namespace, name, "ExporterGone").await;
        }
    }

    let normalized = match reconcile_time_fields(
        lease.spec.begin_time,
        lease.spec.end_time,
        lease.spec.duration_seconds,
    ) {
        Ok(n) => n,
        Err(ReconcileError::Invalid(msg)) => {
            return invalidate(leases, namespace, name, &msg).await;
        }
        Err(other) => return Err(other),
    };

    if lease.spec.selector.trim().is_empty() {
        return invalidate(leases, namespace, name, "empty selector").await;
    }
    let selector = match parse_selector(&lease.spec.selector) {
        Ok(s) => s,
        Err(e) => return invalidate(leases, namespace, name, &e.to_string()).await,
    };

    // Already Ready: check the one-way release latch and expiry; otherwise stay Ready.
    if condition_true(&lease.status.conditions, CONDITION_READY) && lease.status.exporter_ref.is_some() {
        let effective_end = lease.effective_end();
        let expired = effective_end.is_some_and(|end| Utc::now() >= end);
        if lease.spec.release || expired {
            let reason = if lease.spec.release { "Released" } else { "Expired" };
            return end_lease(leases, exporters, namespace, name, reason).await;
        }
        let requeue = effective_end.map(|end| {
            (end - Utc::now())
                .to_std()
                .unwrap_or(StdDuration::from_secs(0))
        });
        return Ok(LeaseReconcileOutcome {
            lease,
            requeue_after: requeue,
        });
    }

    // Not yet bound: run the selection algorithm (§4.4.3).
    let client = clients.get(namespace, &lease.spec.client_ref).await?;
    let candidate_exporters = exporters.list(namespace, &selector).await?;
    let policies = policy_docs.list(namespace, &Default::default()).await?;

    let mut approved = Vec::new();
    for exporter in &candidate_exporters {
        let existing_lease = match &exporter.status.lease_ref {
            Some(existing_name) => match leases.get(namespace, existing_name).await {
                Ok(existing) if !existing.status.ended => Some(existing),
                _ => None,
            },
            None => None,
        };
        approved.extend(approved_exporters_for(exporter, &client, &policies, existing_lease.as_ref())?);
    }

    if approved.is_empty() {
        return unsatisfiable(leases, namespace, name).await;
    }

    // Far-future beginTime: stay Pending until it arrives (DESIGN.md open-question decision:
    // no scheduling horizon is enforced here).
    if let Some(begin) = normalized.begin {
        if Utc::now() < begin {
            let mut lease = lease;
            set_terminal_condition(&mut lease, CONDITION_PENDING, "ScheduledFuture", "beginTime is in the future");
            let requeue = (begin - Utc::now()).to_std().unwrap_or(StdDuration::from_secs(0));
            let saved = leases
                .patch(
                    namespace,
                    name,
                    Some(lease.meta.resource_version),
                    Box::new(move |l: &mut Lease| l.status = lease.status.clone()),
                )
                .await?;
            return Ok(LeaseReconcileOutcome {
                lease: saved,
                requeue_after: Some(requeue),
            });
        }
    }

    order_candidates(&mut approved);
    let Some(winner) = approved.into_iter().find(assignable) else {
        return pending_busy(leases, namespace, name).await;
    };
    // §4.4.4: the winning policy's maximumDuration caps the lease, even if the requester asked
    // for longer. Clamping folds the cap back into `duration_seconds` so later reconciles see a
    // single source of truth; `UpdateLease` re-clamps against the same policy independently
    // before it ever reaches here, since this branch only runs while still unbound.
    let clamped_duration = winner
        .policy
        .maximum_duration_seconds
        .map(|max| normalized.duration_seconds.min(max));

    if let Some(existing) = &winner.existing_lease {
        // Spot-access preemption: the existing holder yields on its own next reconcile.
        let _ = leases
            .patch(
                namespace,
                &existing.meta.name,
                Some(existing.meta.resource_version),
                Box::new(|l: &mut Lease| l.spec.release = true),
            )
            .await;
    }

    let exporter_name = winner.exporter.meta.name.clone();
    match exporters
        .patch(
            namespace,
            &exporter_name,
            Some(winner.exporter.meta.resource_version),
            Box::new({
                let lease_name = name.to_string();
                move |e: &mut crate::model::Exporter| e.status.lease_ref = Some(lease_name)
            }),
        )
        .await
    {
        Ok(_) => {}
        Err(StoreError::Conflict(_)) => {
            // Another reconcile won the race for this exporter; requeue and try again.
            return pending_busy(leases, namespace, name).await;
        }
        Err(other) => return Err(other.into()),
    }

    let now = Utc::now();
    let saved = leases
        .patch(
            namespace,
            name,
            Some(lease.meta.resource_version),
            Box::new(move |l: &mut Lease| {
                l.status.exporter_ref = Some(exporter_name);
                if l.status.begin_time.is_none() {
                    l.status.begin_time = Some(now);
                }
                if let Some(d) = clamped_duration {
                    l.spec.duration_seconds = Some(d);
                    l.spec.end_time = None;
                }
                set_terminal_condition(l, CONDITION_READY, "Bound", "exporter bound");
            }),
        )
        .await?;

    let requeue = saved
        .effective_end()
        .map(|end| (end - Utc::now()).to_std().unwrap_or(StdDuration::from_secs(0)));

    Ok(LeaseReconcileOutcome {
        lease: saved,
        requeue_after: requeue,
    })
}

async fn invalidate(
    leases: &dyn ObjectStore<Lease>,
    namespace: &str,
    name: &str,
    message: &str,
) -> Result<LeaseReconcileOutcome, ReconcileError> {
    let message = message.to_string();
    let lease = leases.get(namespace, name).await?;
    let saved = leases
        .patch(
            namespace,
            name,
            Some(lease.meta.resource_version),
            Box::new(move |l: &mut Lease| {
                set_terminal_condition(l, CONDITION_INVALID, "InvalidSpec", &message);
            }),
        )
        .await?;
    Ok(LeaseReconcileOutcome {
        lease: saved,
        requeue_after: None,
    })
}

async fn unsatisfiable(
    leases: &dyn ObjectStore<Lease>,
    namespace: &str,
    name: &str,
) -> Result<LeaseReconcileOutcome, ReconcileError> {
    let lease = leases.get(namespace, name).await?;
    let saved = leases
        .patch(
            namespace,
            name,
            Some(lease.meta.resource_version),
            Box::new(|l: &mut Lease| {
                set_terminal_condition(
                    l,
                    CONDITION_UNSATISFIABLE,
                    "NoEligibleExporter",
                    "no exporter matches the selector and an approving policy",
                );
            }),
        )
        .await?;
    Ok(LeaseReconcileOutcome {
        lease: saved,
        requeue_after: None,
    })
}

async fn pending_busy(
    leases: &dyn ObjectStore<Lease>,
    namespace: &str,
    name: &str,
) -> Result<LeaseReconcileOutcome, ReconcileError> {
    let lease = leases.get(namespace, name).await?;
    let saved = leases
        .patch(
            namespace,
            name,
            Some(lease.meta.resource_version),
            Box::new(|l: &mut Lease| {
                set_terminal_condition(l, CONDITION_PENDING, "AllBusyOrOffline", "eligible exporters are busy or offline");
            }),
        )
        .await?;
    Ok(LeaseReconcileOutcome {
        lease: saved,
        requeue_after: Some(PENDING_REQUEUE),
    })
}

async fn end_lease(
    leases: &dyn ObjectStore<Lease>,
    exporters: &dyn ObjectStore<crate::model::Exporter>,
    namespace: &str,
    name: &str,
    reason: &str,
) -> Result<LeaseReconcileOutcome, ReconcileError> {
    let lease = leases.get(namespace, name).await?;

    if let Some(exporter_name) = &lease.status.exporter_ref {
        if let Ok(exporter) = exporters.get(namespace, exporter_name).await {
            if exporter.status.lease_ref.as_deref() == Some(name) {
                let _ = exporters
                    .patch(
                        namespace,
                        exporter_name,
                        Some(exporter.meta.resource_version),
                        Box::new(|e: &mut crate::model::Exporter| e.status.lease_ref = None),
                    )
                    .await;
            }
        }
    }

    let now = Utc::now();
    let reason = reason.to_string();
    let saved = leases
        .patch(
            namespace,
            name,
            Some(lease.meta.resource_version),
            Box::new(move |l: &mut Lease| {
                l.status.ended = true;
                l.status.end_time = Some(now);
                l.meta.labels.insert(LABEL_LEASE_ENDED.to_string(), "true".to_string());
                set_condition(
                    &mut l.status.conditions,
                    Condition::new(CONDITION_READY, false, reason.clone(), format!("lease ended: {reason}")),
                );
                for kind in [CONDITION_PENDING, CONDITION_UNSATISFIABLE, CONDITION_INVALID] {
                    set_condition(&mut l.status.conditions, Condition::new(kind, false, "", ""));
                }
            }),
        )
        .await?;

    Ok(LeaseReconcileOutcome {
        lease: saved,
        requeue_after: None,
    })
}
