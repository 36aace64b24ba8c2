//! Conversions between the internal, store-backed domain shapes (`crate::model`) and the wire
//! `controller_proto` messages. Kept in one place so every handler applies the same rules for
//! timestamps (unix nanos on the wire, `DateTime<Utc>` internally) and enum mapping.

use chrono::{DateTime, Utc};

use crate::model::{
    Condition, DeviceReport, Exporter, ExporterStatus, ExporterStatusValue, Lease, LeaseSpec, LeaseStatus, ObjectMeta,
};

pub fn datetime_to_nanos(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_nanos_opt().unwrap_or(0)
}

pub fn nanos_to_datetime(nanos: i64) -> DateTime<Utc> {
    let secs = nanos.div_euclid(1_000_000_000);
    let nsecs = nanos.rem_euclid(1_000_000_000) as u32;
    DateTime::from_timestamp(secs, nsecs).unwrap_or_default()
}

pub fn condition_to_proto(c: &Condition) -> controller_proto::Condition {
    controller_proto::Condition {
        r#type: c.kind.clone(),
        status: c.status,
        reason: c.reason.clone(),
        message: c.message.clone(),
        last_transition_unix_nanos: datetime_to_nanos(c.last_transition),
    }
}

pub fn status_value_to_proto(v: ExporterStatusValue) -> i32 {
    use controller_proto::ExporterStatusValue as P;
    (match v {
        ExporterStatusValue::Unspecified => P::Unspecified,
        ExporterStatusValue::Offline => P::Offline,
        ExporterStatusValue::Available => P::Available,
        ExporterStatusValue::BeforeLeaseHook => P::BeforeLeaseHook,
        ExporterStatusValue::LeaseReady => P::LeaseReady,
        ExporterStatusValue::AfterLeaseHook => P::AfterLeaseHook,
        ExporterStatusValue::BeforeLeaseHookFailed => P::BeforeLeaseHookFailed,
        ExporterStatusValue::AfterLeaseHookFailed => P::AfterLeaseHookFailed,
    }) as i32
}

pub fn status_value_from_proto(v: i32) -> ExporterStatusValue {
    use controller_proto::ExporterStatusValue as P;
    match P::try_from(v).unwrap_or(P::Unspecified) {
        P::Unspecified => ExporterStatusValue::Unspecified,
        P::Offline => ExporterStatusValue::Offline,
        P::Available => ExporterStatusValue::Available,
        P::BeforeLeaseHook => ExporterStatusValue::BeforeLeaseHook,
        P::LeaseReady => ExporterStatusValue::LeaseReady,
        P::AfterLeaseHook => ExporterStatusValue::AfterLeaseHook,
        P::BeforeLeaseHookFailed => ExporterStatusValue::BeforeLeaseHookFailed,
        P::AfterLeaseHookFailed => ExporterStatusValue::AfterLeaseHookFailed,
    }
}

pub fn device_to_proto(d: &DeviceReport) -> controller_proto::Device {
    controller_proto::Device {
        uuid: d.uuid.clone(),
        parent_uuid: d.parent_uuid.clone(),
        labels: d.labels.clone().into_iter().collect(),
    }
}

pub fn device_from_proto(d: controller_proto::Device) -> DeviceReport {
    DeviceReport {
        uuid: d.uuid,
        parent_uuid: d.parent_uuid,
        labels: d.labels.into_iter().collect(),
    }
}

pub fn exporter_to_proto(e: &Exporter) -> controller_proto::Exporter {
    controller_proto::Exporter {
        name: e.meta.name.clone(),
        namespace: e.meta.namespace.clone(),
        uid: e.meta.uid.clone(),
        resource_version: e.meta.resource_version as i64,
        labels: e.meta.labels.clone().into_iter().collect(),
        annotations: e.meta.annotations.clone().into_iter().collect(),
        status: Some(exporter_status_to_proto(&e.status)),
    }
}

fn exporter_status_to_proto(s: &ExporterStatus) -> controller_proto::ExporterStatus {
    controller_proto::ExporterStatus {
        conditions: s.conditions.iter().map(condition_to_proto).collect(),
        devices: s.devices.iter().map(device_to_proto).collect(),
        lease_ref: s.lease_ref.clone(),
        last_seen_unix_nanos: s.last_seen.map(datetime_to_nanos).unwrap_or(0),
        endpoint: s.endpoint.clone(),
        status_value: status_value_to_proto(s.exporter_status_value),
        status_message: s.status_message.clone(),
    }
}

pub fn lease_to_proto(l: &Lease) -> controller_proto::Lease {
    controller_proto::Lease {
        name: l.meta.name.clone(),
        namespace: l.meta.namespace.clone(),
        uid: l.meta.uid.clone(),
        resource_version: l.meta.resource_version as i64,
        labels: l.meta.labels.clone().into_iter().collect(),
        annotations: l.meta.annotations.clone().into_iter().collect(),
        client_ref: l.spec.client_ref.clone(),
        selector: l.spec.selector.clone(),
        duration_seconds: l.spec.duration_seconds,
        begin_time_unix_nanos: l.spec.begin_time.map(datetime_to_nanos),
        end_time_unix_nanos: l.spec.end_time.map(datetime_to_nanos),
        release: l.spec.release,
        status: Some(lease_status_to_proto(&l.status)),
    }
}

fn lease_status_to_proto(s: &LeaseStatus) -> controller_proto::LeaseStatus {
    controller_proto::LeaseStatus {
        begin_time_unix_nanos: s.begin_time.map(datetime_to_nanos),
        end_time_unix_nanos: s.end_time.map(datetime_to_nanos),
        exporter_ref: s.exporter_ref.clone(),
        ended: s.ended,
        conditions: s.conditions.iter().map(condition_to_proto).collect(),
    }
}

/// Extracts the mutable lease spec fields a CreateLease/UpdateLease request carries. Status and
/// identity fields on the incoming message are ignored: those are server-controlled.
pub fn lease_spec_from_proto(l: &controller_proto::Lease) -> LeaseSpec {
    LeaseSpec {
        client_ref: l.client_ref.clone(),
        selector: l.selector.clone(),
        duration_seconds: l.duration_seconds,
        begin_time: l.begin_time_unix_nanos.map(nanos_to_datetime),
        end_time: l.end_time_unix_nanos.map(nanos_to_datetime),
        release: l.release,
    }
}

pub fn new_object_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta::new(namespace, name)
}
