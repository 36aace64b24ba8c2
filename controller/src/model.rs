//! Core domain records. These are the internal, store-backed shapes; the gRPC layer
//! converts to/from the wire `controller_proto` messages at the boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::HasMeta;

pub type Labels = BTreeMap<String, String>;
pub type Annotations = BTreeMap<String, String>;

pub const LABEL_LEASE_ENDED: &str = "jumpstarter.dev/lease-ended";
pub const ANNOTATION_MIGRATED_NAMESPACE: &str = "jumpstarter.dev/migrated-namespace";
pub const ANNOTATION_MIGRATED_UID: &str = "jumpstarter.dev/migrated-uid";

/// Fields every record carries: `(namespace, name, uid, generation, resourceVersion, labels,
/// annotations, creationTime)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub generation: u64,
    pub resource_version: u64,
    pub labels: Labels,
    pub annotations: Annotations,
    pub creation_time: DateTime<Utc>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: uuid::Uuid::new_v4().to_string(),
            generation: 1,
            resource_version: 0,
            labels: Labels::new(),
            annotations: Annotations::new(),
            creation_time: Utc::now(),
        }
    }

    pub fn migrated_namespace(&self) -> Option<&str> {
        self.annotations
            .get(ANNOTATION_MIGRATED_NAMESPACE)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn migrated_uid(&self) -> Option<&str> {
        self.annotations
            .get(ANNOTATION_MIGRATED_UID)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub kind: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition: DateTime<Utc>,
}

impl Condition {
    pub fn new(kind: impl Into<String>, status: bool, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition: Utc::now(),
        }
    }
}

/// Set (or replace) a condition by kind, bumping `last_transition` only when the status or
/// reason actually changes, matching the k8s `meta.SetStatusCondition` convention.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == new.kind) {
        if existing.status != new.status || existing.reason != new.reason {
            *existing = new;
        } else {
            existing.message = new.message;
        }
    } else {
        conditions.push(new);
    }
}

pub fn condition_true(conditions: &[Condition], kind: &str) -> bool {
    conditions.iter().any(|c| c.kind == kind && c.status)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Client {
    pub meta: ObjectMeta,
    pub username_override: Option<String>,
    pub endpoint: String,
}

impl Client {
    /// `client:{ns'}:{name}:{uid'}` with migration overrides applied.
    pub fn internal_subject(&self) -> String {
        internal_subject("client", &self.meta)
    }
}

pub fn internal_subject(kind: &str, meta: &ObjectMeta) -> String {
    let ns = meta.migrated_namespace().unwrap_or(&meta.namespace);
    let uid = meta.migrated_uid().unwrap_or(&meta.uid);
    format!("{kind}:{ns}:{}:{uid}", meta.name)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExporterStatusValue {
    Unspecified,
    Offline,
    Available,
    BeforeLeaseHook,
    LeaseReady,
    AfterLeaseHook,
    BeforeLeaseHookFailed,
    AfterLeaseHookFailed,
}

impl ExporterStatusValue {
    /// Whether this status value, on its own, implies the exporter is reachable.
    pub fn implies_online(self) -> bool {
        !matches!(self, Self::Unspecified | Self::Offline)
    }
}

impl Default for ExporterStatusValue {
    fn default() -> Self {
        Self::Unspecified
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceReport {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub labels: Labels,
}

pub const CONDITION_REGISTERED: &str = "Registered";
pub const CONDITION_ONLINE: &str = "Online";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExporterStatus {
    pub conditions: Vec<Condition>,
    pub devices: Vec<DeviceReport>,
    pub lease_ref: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub endpoint: String,
    pub exporter_status_value: ExporterStatusValue,
    pub status_message: String,
}

impl ExporterStatus {
    pub fn online(&self) -> bool {
        condition_true(&self.conditions, CONDITION_ONLINE)
    }

    pub fn registered(&self) -> bool {
        condition_true(&self.conditions, CONDITION_REGISTERED)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Exporter {
    pub meta: ObjectMeta,
    pub username_override: Option<String>,
    pub status: ExporterStatus,
}

impl Exporter {
    pub fn internal_subject(&self) -> String {
        internal_subject("exporter", &self.meta)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LeaseSpec {
    pub client_ref: String,
    pub selector: String,
    pub duration_seconds: Option<i64>,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub release: bool,
}

pub const CONDITION_PENDING: &str = "Pending";
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_UNSATISFIABLE: &str = "Unsatisfiable";
pub const CONDITION_INVALID: &str = "Invalid";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LeaseStatus {
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exporter_ref: Option<String>,
    pub ended: bool,
    pub conditions: Vec<Condition>,
}

impl LeaseStatus {
    pub fn is_ready(&self) -> bool {
        condition_true(&self.conditions, CONDITION_READY)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lease {
    pub meta: ObjectMeta,
    pub spec: LeaseSpec,
    pub status: LeaseStatus,
}

impl Lease {
    pub fn internal_subject_of_owner(&self) -> String {
        format!("lease:{}:{}:{}", self.meta.namespace, self.meta.name, self.meta.uid)
    }

    /// `effective_end` per §4.4.2: status.endTime, else beginTime+duration, else
    /// spec.endTime, else spec.beginTime+duration.
    pub fn effective_end(&self) -> Option<DateTime<Utc>> {
        if let Some(end) = self.status.end_time {
            return Some(end);
        }
        if let (Some(begin), Some(dur)) = (self.status.begin_time, self.spec.duration_seconds) {
            return Some(begin + chrono::Duration::seconds(dur));
        }
        if let Some(end) = self.spec.end_time {
            return Some(end);
        }
        if let (Some(begin), Some(dur)) = (self.spec.begin_time, self.spec.duration_seconds) {
            return Some(begin + chrono::Duration::seconds(dur));
        }
        None
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub priority: i64,
    pub from: Vec<PolicyFrom>,
    pub maximum_duration_seconds: Option<i64>,
    pub spot_access: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyFrom {
    pub client_selector: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExporterAccessPolicy {
    pub meta: ObjectMeta,
    pub exporter_selector: String,
    pub policies: Vec<PolicyEntry>,
}

macro_rules! impl_has_meta {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl HasMeta for $ty {
                fn meta(&self) -> &ObjectMeta {
                    &self.meta
                }
                fn meta_mut(&mut self) -> &mut ObjectMeta {
                    &mut self.meta
                }
            }
        )+
    };
}

impl_has_meta!(Client, Exporter, Lease, ExporterAccessPolicy);
