//! `ClientService` (§4.1): the client-facing surface for reading exporters and managing leases.

use tonic::{Request, Response, Status};

use controller_proto::client_service_server::ClientService;
use controller_proto::{
    CreateLeaseRequest, DeleteLeaseRequest, DeleteLeaseResponse, GetExporterRequest, GetLeaseRequest,
    ListExportersRequest, ListExportersResponse, ListLeasesRequest, ListLeasesResponse, UpdateLeaseRequest,
};

use crate::auth::is_authorized;
use crate::error::ControllerError;
use crate::identifier::{parse_namespace, parse_object, Kind, ObjectKey};
use crate::lease::{order_candidates, reconcile_time_fields};
use crate::model::{Lease, LeaseStatus, ObjectMeta};
use crate::policy::approved_exporters_for;
use crate::selector::{parse_selector, Selector};

use super::convert::{exporter_to_proto, lease_spec_from_proto, lease_to_proto};
use super::{authenticate, paginate, trigger_lease_reconcile, AppState};

pub struct ClientServiceImpl {
    state: AppState,
}

impl ClientServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn parse_exporter_id(id: &str) -> Result<ObjectKey, ControllerError> {
        let key = parse_object(id)?;
        if !matches!(key.kind, Kind::Exporters) {
            return Err(ControllerError::InvalidArgument(format!("{id} is not an exporter identifier")));
        }
        Ok(key)
    }

    fn parse_lease_id(id: &str) -> Result<ObjectKey, ControllerError> {
        let key = parse_object(id)?;
        if !matches!(key.kind, Kind::Leases) {
            return Err(ControllerError::InvalidArgument(format!("{id} is not a lease identifier")));
        }
        Ok(key)
    }

    /// Clients may only touch leases that are their own (§4.3): authorized iff the caller's
    /// identity matches the lease's `clientRef`.
    async fn authorize_lease_owner(&self, username: &str, namespace: &str, lease: &Lease) -> Result<(), ControllerError> {
        let client = self.state.clients.get(namespace, &lease.spec.client_ref).await?;
        if is_authorized(username, &self.state.username_prefix, "client", &client.meta, client.username_override.as_deref()) {
            Ok(())
        } else {
            Err(ControllerError::PermissionDenied(format!("{username} does not own this lease")))
        }
    }
}

#[tonic::async_trait]
impl ClientService for ClientServiceImpl {
    async fn get_exporter(&self, request: Request<GetExporterRequest>) -> Result<Response<controller_proto::Exporter>, Status> {
        authenticate(&request, &self.state.authenticator)?;
        let req = request.into_inner();
        let key = Self::parse_exporter_id(&req.name)?;
        let exporter = self.state.exporters.get(&key.namespace, &key.name).await.map_err(ControllerError::from)?;
        Ok(Response::new(exporter_to_proto(&exporter)))
    }

    async fn list_exporters(
        &self,
        request: Request<ListExportersRequest>,
    ) -> Result<Response<ListExportersResponse>, Status> {
        authenticate(&request, &self.state.authenticator)?;
        let req = request.into_inner();
        let parent = parse_namespace(&req.parent).map_err(ControllerError::from)?;
        let selector = if req.filter.is_empty() {
            Selector::default()
        } else {
            parse_selector(&req.filter).map_err(ControllerError::from)?
        };
        let all = self.state.exporters.list(&parent.namespace, &selector).await.map_err(ControllerError::from)?;
        let (page, next_page_token) = paginate(all, req.page_size, &req.page_token);
        Ok(Response::new(ListExportersResponse {
            exporters: page.iter().map(exporter_to_proto).collect(),
            next_page_token,
        }))
    }

    async fn get_lease(&self, request: Request<GetLeaseRequest>) -> Result<Response<controller_proto::Lease>, Status> {
        let user = authenticate(&request, &self.state.authenticator)?;
        let req = request.into_inner();
        let key = Self::parse_lease_id(&req.name)?;
        let lease = self.state.leases.get(&key.namespace, &key.name).await.map_err(ControllerError::from)?;
        self.authorize_lease_owner(&user.username, &key.namespace, &lease).await?;
        Ok(Response::new(lease_to_proto(&lease)))
    }

    async fn list_leases(&self, request: Request<ListLeasesRequest>) -> Result<Response<ListLeasesResponse>, Status> {
        let user = authenticate(&request, &self.state.authenticator)?;
        let req = request.into_inner();
        let parent = parse_namespace(&req.parent).map_err(ControllerError::from)?;
        let selector = if req.filter.is_empty() {
            Selector::default()
        } else {
            parse_selector(&req.filter).map_err(ControllerError::from)?
        };
        let mut all = self.state.leases.list(&parent.namespace, &selector).await.map_err(ControllerError::from)?;

        let mut owned = Vec::with_capacity(all.len());
        for lease in all.drain(..) {
            if self.authorize_lease_owner(&user.username, &parent.namespace, &lease).await.is_ok() {
                owned.push(lease);
            }
        }
        if req.only_active == Some(true) {
            owned.retain(|l| !l.status.ended);
        }

        let (page, next_page_token) = paginate(owned, req.page_size, &req.page_token);
        Ok(Response::new(ListLeasesResponse {
            leases: page.iter().map(lease_to_proto).collect(),
            next_page_token,
        }))
    }

    async fn create_lease(&self, request: Request<CreateLeaseRequest>) -> Result<Response<controller_proto::Lease>, Status> {
        let user = authenticate(&request, &self.state.authenticator)?;
        let req = request.into_inner();
        let parent = parse_namespace(&req.parent).map_err(ControllerError::from)?;
        let proto_lease = req
            .lease
            .ok_or_else(|| ControllerError::InvalidArgument("lease is required".to_string()))?;
        let spec = lease_spec_from_proto(&proto_lease);

        let client = self
            .state
            .clients
            .get(&parent.namespace, &spec.client_ref)
            .await
            .map_err(ControllerError::from)?;
        if !is_authorized(&user.username, &self.state.username_prefix, "client", &client.meta, client.username_override.as_deref()) {
            return Err(ControllerError::PermissionDenied(format!("{} cannot create leases for {}", user.username, spec.client_ref)).into());
        }

        let name = req.lease_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let lease = Lease {
            meta: ObjectMeta::new(parent.namespace.clone(), name.clone()),
            spec,
            status: LeaseStatus::default(),
        };
        self.state.leases.create(lease).await.map_err(ControllerError::from)?;

        let saved = trigger_lease_reconcile(&self.state, &parent.namespace, &name).await?;
        Ok(Response::new(lease_to_proto(&saved)))
    }

    async fn update_lease(&self, request: Request<UpdateLeaseRequest>) -> Result<Response<controller_proto::Lease>, Status> {
        let user = authenticate(&request, &self.state.authenticator)?;
        let req = request.into_inner();
        let proto_lease = req
            .lease
            .ok_or_else(|| ControllerError::InvalidArgument("lease is required".to_string()))?;
        let key = ObjectKey {
            namespace: proto_lease.namespace.clone(),
            kind: Kind::Leases,
            name: proto_lease.name.clone(),
        };
        let existing = self.state.leases.get(&key.namespace, &key.name).await.map_err(ControllerError::from)?;
        self.authorize_lease_owner(&user.username, &key.namespace, &existing).await?;

        let mut new_spec = lease_spec_from_proto(&proto_lease);
        validate_lease_update(&existing, &new_spec)?;

        if let Some(exporter_name) = existing.status.exporter_ref.clone() {
            // §4.4.4: maximumDuration clamping is enforced at Update as well as Create. Re-resolve
            // the bound exporter's winning policy and re-clamp before persisting, rather than
            // letting an arbitrary duration through because the lease is already Ready.
            let client = self.state.clients.get(&key.namespace, &new_spec.client_ref).await.map_err(ControllerError::from)?;
            let exporter = self.state.exporters.get(&key.namespace, &exporter_name).await.map_err(ControllerError::from)?;
            let policies = self.state.policies.list(&key.namespace, &Selector::default()).await.map_err(ControllerError::from)?;
            let mut approved = approved_exporters_for(&exporter, &client, &policies, None).map_err(ControllerError::from)?;
            if !approved.is_empty() {
                order_candidates(&mut approved);
                if let Some(max) = approved[0].policy.maximum_duration_seconds {
                    let normalized =
                        reconcile_time_fields(new_spec.begin_time, new_spec.end_time, new_spec.duration_seconds)
                            .map_err(ControllerError::from)?;
                    if normalized.duration_seconds > max {
                        new_spec.duration_seconds = Some(max);
                        new_spec.end_time = None;
                    }
                }
            }
        } else if new_spec.client_ref != existing.spec.client_ref {
            // Same-namespace is structural here: `client_ref` is a bare name resolved against
            // this lease's own namespace, never a cross-namespace identifier (§4.4.4).
            self.state.clients.get(&key.namespace, &new_spec.client_ref).await.map_err(ControllerError::from)?;
        }

        let expected_rv = existing.meta.resource_version;
        self.state
            .leases
            .patch(
                &key.namespace,
                &key.name,
                Some(expected_rv),
                Box::new(move |l: &mut Lease| l.spec = new_spec),
            )
            .await
            .map_err(ControllerError::from)?;

        let saved = trigger_lease_reconcile(&self.state, &key.namespace, &key.name).await?;
        Ok(Response::new(lease_to_proto(&saved)))
    }

    async fn delete_lease(&self, request: Request<DeleteLeaseRequest>) -> Result<Response<DeleteLeaseResponse>, Status> {
        let user = authenticate(&request, &self.state.authenticator)?;
        let req = request.into_inner();
        let key = Self::parse_lease_id(&req.name)?;
        let existing = self.state.leases.get(&key.namespace, &key.name).await.map_err(ControllerError::from)?;
        self.authorize_lease_owner(&user.username, &key.namespace, &existing).await?;

        // Deleting a lease is a release request, not an immediate hard delete: the scheduler
        // still needs one more reconcile to unbind the exporter cleanly (§4.4.5).
        self.state
            .leases
            .patch(
                &key.namespace,
                &key.name,
                Some(existing.meta.resource_version),
                Box::new(|l: &mut Lease| l.spec.release = true),
            )
            .await
            .map_err(ControllerError::from)?;
        trigger_lease_reconcile(&self.state, &key.namespace, &key.name).await?;

        Ok(Response::new(DeleteLeaseResponse {}))
    }
}

/// UpdateLease validation (§4.4.4), kept as a pure function so the edge cases are testable
/// without standing up a whole `ClientServiceImpl`.
fn validate_lease_update(existing: &Lease, new_spec: &crate::model::LeaseSpec) -> Result<(), ControllerError> {
    let bound = existing.status.exporter_ref.is_some();
    if bound && new_spec.begin_time != existing.spec.begin_time {
        return Err(ControllerError::FailedPrecondition(
            "beginTime cannot be changed after the lease has been bound".to_string(),
        ));
    }

    if new_spec.client_ref != existing.spec.client_ref && (!existing.status.is_ready() || existing.status.ended) {
        return Err(ControllerError::FailedPrecondition(
            "clientRef can only be transferred while the lease is Ready".to_string(),
        ));
    }

    Ok(())
}
