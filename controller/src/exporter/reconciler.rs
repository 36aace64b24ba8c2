//! Register/Status/Unregister side effects (§4.6). Unlike the lease scheduler there's no
//! repeated reconcile loop here: each RPC applies one patch directly, since none of these
//! transitions depend on anything but the request itself and the exporter's current state.

use chrono::Utc;
use thiserror::Error;

use crate::model::{
    set_condition, Condition, DeviceReport, Exporter, ExporterStatusValue, Labels, Lease, CONDITION_ONLINE,
    CONDITION_REGISTERED,
};
use crate::store::{ObjectStore, StoreError};

pub const EXPORTER_LABEL_PREFIX: &str = "jumpstarter.dev/";

#[derive(Debug, Error)]
pub enum ExporterReconcileError {
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for ExporterReconcileError {
    fn from(err: StoreError) -> Self {
        ExporterReconcileError::Store(err.to_string())
    }
}

/// Register (§4.6): replaces the exporter-managed `jumpstarter.dev/*` label set and the device
/// report, leaving any user-set labels untouched, and sets Registered=True. Only labels already
/// carrying the managed prefix in `managed_labels` are applied; anything else in that map is
/// dropped rather than silently promoted into the managed set.
pub async fn register(
    exporters: &dyn ObjectStore<Exporter>,
    namespace: &str,
    name: &str,
    managed_labels: Labels,
    devices: Vec<DeviceReport>,
) -> Result<Exporter, ExporterReconcileError> {
    let existing = exporters.get(namespace, name).await?;
    let rv = existing.meta.resource_version;
    let saved = exporters
        .patch(
            namespace,
            name,
            Some(rv),
            Box::new(move |e: &mut Exporter| {
                e.meta.labels.retain(|k, _| !k.starts_with(EXPORTER_LABEL_PREFIX));
                for (k, v) in managed_labels {
                    if k.starts_with(EXPORTER_LABEL_PREFIX) {
                        e.meta.labels.insert(k, v);
                    }
                }
                e.status.devices = devices;
                set_condition(&mut e.status.conditions, Condition::new(CONDITION_REGISTERED, true, "Register", ""));
            }),
        )
        .await?;
    Ok(saved)
}

/// Unregister (§4.6): Registered=False. Does not end or unbind an active lease — a replacement
/// exporter process may reconnect under the same identity and pick the reservation back up.
pub async fn unregister(
    exporters: &dyn ObjectStore<Exporter>,
    namespace: &str,
    name: &str,
    reason: &str,
) -> Result<Exporter, ExporterReconcileError> {
    let existing = exporters.get(namespace, name).await?;
    let rv = existing.meta.resource_version;
    let reason = reason.to_string();
    let saved = exporters
        .patch(
            namespace,
            name,
            Some(rv),
            Box::new(move |e: &mut Exporter| {
                set_condition(&mut e.status.conditions, Condition::new(CONDITION_REGISTERED, false, "Bye", reason));
            }),
        )
        .await?;
    Ok(saved)
}

/// Status report (§4.6): updates `exporterStatusValue`/`statusMessage`/`lastSeen` and derives
/// Online from the value alone. Old exporters that don't send the newer optional fields
/// (`status_version`, `previous_status`, `release_lease`) never flip Online=False by omission
/// (§9 compatibility note) — those fields only ever add behavior (a hook-triggered release
/// request), never subtract it.
pub async fn report_status(
    exporters: &dyn ObjectStore<Exporter>,
    leases: &dyn ObjectStore<Lease>,
    namespace: &str,
    name: &str,
    value: ExporterStatusValue,
    message: &str,
    release_lease: Option<bool>,
) -> Result<Exporter, ExporterReconcileError> {
    let existing = exporters.get(namespace, name).await?;
    let rv = existing.meta.resource_version;
    let now = Utc::now();
    let message_owned = message.to_string();
    let saved = exporters
        .patch(
            namespace,
            name,
            Some(rv),
            Box::new(move |e: &mut Exporter| {
                e.status.exporter_status_value = value;
                e.status.status_message = message_owned;
                e.status.last_seen = Some(now);
                set_condition(
                    &mut e.status.conditions,
                    Condition::new(CONDITION_ONLINE, value.implies_online(), "StatusReport", ""),
                );
            }),
        )
        .await?;

    if release_lease == Some(true) {
        if let Some(lease_name) = saved.status.lease_ref.clone() {
            if let Ok(lease) = leases.get(namespace, &lease_name).await {
                if !lease.status.ended {
                    let _ = leases
                        .patch(
                            namespace,
                            &lease_name,
                            Some(lease.meta.resource_version),
                            Box::new(|l: &mut Lease| l.spec.release = true),
                        )
                        .await;
                }
            }
        }
    }

    Ok(saved)
}

/// Listen connect (§4.6): Online=True, reason Connect.
pub async fn on_listen_connected(
    exporters: &dyn ObjectStore<Exporter>,
    namespace: &str,
    name: &str,
) -> Result<Exporter, ExporterReconcileError> {
    let existing = exporters.get(namespace, name).await?;
    let rv = existing.meta.resource_version;
    let saved = exporters
        .patch(
            namespace,
            name,
            Some(rv),
            Box::new(|e: &mut Exporter| {
                set_condition(&mut e.status.conditions, Condition::new(CONDITION_ONLINE, true, "Connect", ""));
            }),
        )
        .await?;
    Ok(saved)
}

/// Listen disconnect (§4.6): Online=False, reason Disconnect. Doesn't touch the lease — a
/// flaky reconnect shouldn't forfeit a reservation (§4.4.5 handles actual exporter deletion
/// separately from a dropped stream).
pub async fn on_listen_disconnected(
    exporters: &dyn ObjectStore<Exporter>,
    namespace: &str,
    name: &str,
) -> Result<Exporter, ExporterReconcileError> {
    let existing = exporters.get(namespace, name).await?;
    let rv = existing.meta.resource_version;
    let saved = exporters
        .patch(
            namespace,
            name,
            Some(rv),
            Box::new(|e: &mut Exporter| {
                set_condition(&mut e.status.conditions, Condition::new(CONDITION_ONLINE, false, "Disconnect", ""));
            }),
        )
        .await?;
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectMeta;
    use crate::store::MemoryStore;

    fn exporter() -> Exporter {
        Exporter {
            meta: ObjectMeta::new("lab1", "e1"),
            username_override: None,
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn register_replaces_managed_labels_only() {
        let store = MemoryStore::<Exporter>::new();
        let mut e = exporter();
        e.meta.labels.insert("jumpstarter.dev/old".to_string(), "x".to_string());
        e.meta.labels.insert("team".to_string(), "qa".to_string());
        store.create(e).await.unwrap();

        let mut managed = Labels::new();
        managed.insert("jumpstarter.dev/dut".to_string(), "a".to_string());
        managed.insert("ignored".to_string(), "y".to_string());

        let saved = register(&store, "lab1", "e1", managed, vec![]).await.unwrap();
        assert_eq!(saved.meta.labels.get("team").map(String::as_str), Some("qa"));
        assert_eq!(saved.meta.labels.get("jumpstarter.dev/dut").map(String::as_str), Some("a"));
        assert!(!saved.meta.labels.contains_key("jumpstarter.dev/old"));
        assert!(!saved.meta.labels.contains_key("ignored"));
        assert!(saved.status.registered());
    }

    #[tokio::test]
    async fn status_report_without_optional_fields_keeps_online_semantics() {
        let store = MemoryStore::<Exporter>::new();
        let leases = MemoryStore::<Lease>::new();
        store.create(exporter()).await.unwrap();

        let saved = report_status(&store, &leases, "lab1", "e1", ExporterStatusValue::Available, "", None)
            .await
            .unwrap();
        assert!(saved.status.online());
    }

    #[tokio::test]
    async fn offline_status_value_clears_online() {
        let store = MemoryStore::<Exporter>::new();
        let leases = MemoryStore::<Lease>::new();
        store.create(exporter()).await.unwrap();

        let saved = report_status(&store, &leases, "lab1", "e1", ExporterStatusValue::Offline, "", None)
            .await
            .unwrap();
        assert!(!saved.status.online());
    }

    #[tokio::test]
    async fn listen_connect_then_disconnect_toggles_online() {
        let store = MemoryStore::<Exporter>::new();
        store.create(exporter()).await.unwrap();

        let connected = on_listen_connected(&store, "lab1", "e1").await.unwrap();
        assert!(connected.status.online());

        let disconnected = on_listen_disconnected(&store, "lab1", "e1").await.unwrap();
        assert!(!disconnected.status.online());
    }

    #[tokio::test]
    async fn release_lease_flag_sets_release_on_the_held_lease() {
        let exporters = MemoryStore::<Exporter>::new();
        let leases = MemoryStore::<Lease>::new();
        let mut e = exporter();
        e.status.lease_ref = Some("l1".to_string());
        exporters.create(e).await.unwrap();
        leases
            .create(Lease {
                meta: ObjectMeta::new("lab1", "l1"),
                spec: crate::model::LeaseSpec::default(),
                status: Default::default(),
            })
            .await
            .unwrap();

        report_status(&exporters, &leases, "lab1", "e1", ExporterStatusValue::LeaseReady, "", Some(true))
            .await
            .unwrap();

        let lease = leases.get("lab1", "l1").await.unwrap();
        assert!(lease.spec.release);
    }
}
