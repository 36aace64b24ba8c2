//! `ControllerService` (§4.6-§4.7): the exporter-facing surface (Register/Unregister/Status/
//! Listen) plus Dial, which mints the stream-JWT pair a client and its bound exporter use to
//! rendezvous on the router.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use controller_proto::controller_service_server::ControllerService;
use controller_proto::listen_response::Payload;
use controller_proto::{
    DialNotification, DialRequest, DialResponse, ListenRequest, ListenResponse, RegisterRequest, RegisterResponse,
    StatusRequest, StatusResponse, UnregisterRequest, UnregisterResponse,
};

use crate::auth::is_authorized;
use crate::error::ControllerError;
use crate::exporter::{self, AlreadyListening, ListenRegistry};
use crate::identifier::{parse_object, Kind};
use crate::model::Labels;
use crate::store::ObjectStore;

use super::convert::device_from_proto;
use super::{authenticate, AppState};

/// Pulls `{ns}`/`{name}` for the exporter identified by the caller's own authenticated
/// identity: exporters authenticate with an internally-minted bootstrap token whose subject is
/// exactly `internal_subject("exporter", meta)` (§4.2), so the username itself is the lookup key
/// — no exporter id travels on the wire for Register/Unregister/Status/Listen.
fn exporter_identity(prefix: &str, username: &str) -> Result<(String, String), ControllerError> {
    let rest = username
        .strip_prefix(prefix)
        .ok_or_else(|| ControllerError::PermissionDenied("not an exporter identity".to_string()))?;
    let mut parts = rest.splitn(4, ':');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("exporter"), Some(ns), Some(name), Some(_uid)) => Ok((ns.to_string(), name.to_string())),
        _ => Err(ControllerError::PermissionDenied("not an exporter identity".to_string())),
    }
}

pub struct ControllerServiceImpl {
    state: AppState,
}

impl ControllerServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Resolves and authorizes the calling exporter in one step: parses its identity out of the
    /// authenticated username, loads the exporter, then re-checks with [`is_authorized`] so a
    /// stale token (exporter recreated under the same name with a new uid, or a migration
    /// override) is rejected rather than silently matched by name alone.
    async fn authorized_exporter(&self, username: &str) -> Result<crate::model::Exporter, ControllerError> {
        let (namespace, name) = exporter_identity(&self.state.username_prefix, username)?;
        let exporter = self.state.exporters.get(&namespace, &name).await?;
        if !is_authorized(
            username,
            &self.state.username_prefix,
            "exporter",
            &exporter.meta,
            exporter.username_override.as_deref(),
        ) {
            return Err(ControllerError::PermissionDenied(format!("{username} is not exporter {namespace}/{name}")));
        }
        Ok(exporter)
    }
}

#[tonic::async_trait]
impl ControllerService for ControllerServiceImpl {
    async fn register(&self, request: Request<RegisterRequest>) -> Result<Response<RegisterResponse>, Status> {
        let user = authenticate(&request, &self.state.authenticator)?;
        let exporter = self.authorized_exporter(&user.username).await?;
        let req = request.into_inner();

        let managed_labels: Labels = req.labels.into_iter().collect();
        let devices = req.reports.into_iter().map(device_from_proto).collect();

        let saved = exporter::register(
            self.state.exporters.as_ref(),
            &exporter.meta.namespace,
            &exporter.meta.name,
            managed_labels,
            devices,
        )
        .await
        .map_err(|e| ControllerError::Internal(e.to_string()))?;

        Ok(Response::new(RegisterResponse { uuid: saved.meta.uid }))
    }

    async fn unregister(&self, request: Request<UnregisterRequest>) -> Result<Response<UnregisterResponse>, Status> {
        let user = authenticate(&request, &self.state.authenticator)?;
        let exporter = self.authorized_exporter(&user.username).await?;
        let req = request.into_inner();

        exporter::unregister(self.state.exporters.as_ref(), &exporter.meta.namespace, &exporter.meta.name, &req.reason)
            .await
            .map_err(|e| ControllerError::Internal(e.to_string()))?;

        Ok(Response::new(UnregisterResponse {}))
    }

    async fn status(&self, request: Request<StatusRequest>) -> Result<Response<StatusResponse>, Status> {
        let user = authenticate(&request, &self.state.authenticator)?;
        let exporter = self.authorized_exporter(&user.username).await?;
        let req = request.into_inner();

        let value = super::convert::status_value_from_proto(req.exporter_status);
        exporter::report_status(
            self.state.exporters.as_ref(),
            self.state.leases.as_ref(),
            &exporter.meta.namespace,
            &exporter.meta.name,
            value,
            &req.status_message,
            req.release_lease,
        )
        .await
        .map_err(|e| ControllerError::Internal(e.to_string()))?;

        Ok(Response::new(StatusResponse {}))
    }

    type ListenStream = ListenStream;

    async fn listen(&self, request: Request<ListenRequest>) -> Result<Response<Self::ListenStream>, Status> {
        let user = authenticate(&request, &self.state.authenticator)?;
        let exporter = self.authorized_exporter(&user.username).await?;

        let (tx, rx) = mpsc::channel(16);
        let (handle, _cancel) = self
            .state
            .listen_registry
            .register(&exporter.meta.uid, tx)
            .map_err(|AlreadyListening(uid)| Status::already_exists(format!("exporter {uid} already has an open Listen stream")))?;

        exporter::on_listen_connected(self.state.exporters.as_ref(), &exporter.meta.namespace, &exporter.meta.name)
            .await
            .map_err(|e| ControllerError::Internal(e.to_string()))?;

        let stream = ListenStream {
            inner: ReceiverStream::new(rx),
            cleanup: Some(ListenCleanup {
                exporters: self.state.exporters.clone(),
                registry: self.state.listen_registry.clone(),
                namespace: exporter.meta.namespace,
                name: exporter.meta.name,
                handle,
            }),
        };

        Ok(Response::new(stream))
    }

    /// Mints the stream-JWT pair and pushes one half to the exporter's open Listen stream
    /// (§4.7). Despite living on `ControllerService` per the wire definition, Dial is
    /// client-initiated: the caller here is the lease's owning client, not the exporter.
    async fn dial(&self, request: Request<DialRequest>) -> Result<Response<DialResponse>, Status> {
        let user = authenticate(&request, &self.state.authenticator)?;
        let req = request.into_inner();

        let key = parse_object(&req.lease_name).map_err(ControllerError::from)?;
        if !matches!(key.kind, Kind::Leases) {
            return Err(ControllerError::InvalidArgument(format!("{} is not a lease identifier", req.lease_name)).into());
        }

        let lease = self.state.leases.get(&key.namespace, &key.name).await.map_err(ControllerError::from)?;
        let client = self.state.clients.get(&key.namespace, &lease.spec.client_ref).await.map_err(ControllerError::from)?;
        if !is_authorized(
            &user.username,
            &self.state.username_prefix,
            "client",
            &client.meta,
            client.username_override.as_deref(),
        ) {
            return Err(ControllerError::PermissionDenied(format!("{} does not own this lease", user.username)).into());
        }

        if !lease.status.is_ready() || lease.status.ended {
            return Err(ControllerError::FailedPrecondition("lease is not ready".to_string()).into());
        }
        let exporter_name = lease
            .status
            .exporter_ref
            .as_ref()
            .ok_or_else(|| ControllerError::Internal("ready lease has no exporter_ref".to_string()))?;
        let exporter = self.state.exporters.get(&key.namespace, exporter_name).await.map_err(ControllerError::from)?;

        let stream_id = uuid::Uuid::new_v4().to_string();
        let exporter_token = self
            .state
            .stream_tokens
            .issue(&stream_id)
            .map_err(|e| ControllerError::Internal(e.to_string()))?;
        let client_token = self
            .state
            .stream_tokens
            .issue(&stream_id)
            .map_err(|e| ControllerError::Internal(e.to_string()))?;

        let pushed = self
            .state
            .listen_registry
            .push(
                &exporter.meta.uid,
                ListenResponse {
                    payload: Some(Payload::Dial(DialNotification {
                        stream_id,
                        token: exporter_token,
                        router_endpoint: self.state.router_endpoint.clone(),
                    })),
                },
            )
            .await;
        if !pushed {
            return Err(ControllerError::Unavailable("exporter is not currently listening".to_string()).into());
        }

        Ok(Response::new(DialResponse {
            router_endpoint: self.state.router_endpoint.clone(),
            token: client_token,
        }))
    }
}

struct ListenCleanup {
    exporters: std::sync::Arc<dyn ObjectStore<crate::model::Exporter>>,
    registry: std::sync::Arc<ListenRegistry>,
    namespace: String,
    name: String,
    handle: crate::exporter::ListenHandle,
}

/// Wraps the Listen channel receiver so the stream's `Drop` — fired whenever the exporter's
/// connection goes away, cleanly or not — deregisters the session and flips Online=False
/// (§4.6). A plain `ReceiverStream` has no hook for "the client stopped polling"; this does.
pub struct ListenStream {
    inner: ReceiverStream<Result<ListenResponse, Status>>,
    cleanup: Option<ListenCleanup>,
}

impl Stream for ListenStream {
    type Item = Result<ListenResponse, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for ListenStream {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            tokio::spawn(async move {
                cleanup.registry.unregister(&cleanup.handle);
                let _ = exporter::on_listen_disconnected(cleanup.exporters.as_ref(), &cleanup.namespace, &cleanup.name).await;
            });
        }
    }
}
