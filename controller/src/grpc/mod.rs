//! The gRPC surface (§4.1-§4.3, §4.7): `ClientService`, `ControllerService`, and
//! `RouterService` wired to the domain reconcilers, translating every error through
//! [`ControllerError`](crate::error::ControllerError) into a `tonic::Status`.

pub mod client_service;
pub mod controller_service;
pub mod convert;
pub mod router_service;

use std::sync::Arc;

use tonic::{Request, Status};

use crate::auth::{Authenticator, UserInfo};
use crate::error::ControllerError;

/// Pulls the bearer token out of the `authorization` header and authenticates it. Every RPC
/// handler calls this first; there is no anonymous access (§4.3).
pub fn authenticate<T>(req: &Request<T>, authenticator: &Authenticator) -> Result<UserInfo, Status> {
    let mut headers = req.metadata().get_all("authorization").iter();
    let header = headers
        .next()
        .ok_or(ControllerError::Unauthenticated("missing authorization header".to_string()))?;
    if headers.next().is_some() {
        return Err(ControllerError::InvalidArgument("more than one authorization header".to_string()).into());
    }
    let header = header
        .to_str()
        .map_err(|_| ControllerError::Unauthenticated("authorization header is not valid ASCII".to_string()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(ControllerError::Unauthenticated("expected a Bearer token".to_string()))?;
    let user = authenticator
        .authenticate(token)
        .map_err(|e| ControllerError::Unauthenticated(e.to_string()))?;
    Ok(user)
}

/// Runs one lease reconcile pass synchronously so a `CreateLease`/`UpdateLease` caller sees an
/// up-to-date status without waiting for the background worker pool, then schedules the next
/// pass on [`AppState::lease_queue`] if the reconciler asked for one (§4.4, §5).
pub async fn trigger_lease_reconcile(
    state: &AppState,
    namespace: &str,
    name: &str,
) -> Result<crate::model::Lease, ControllerError> {
    let outcome = crate::lease::reconcile_once(
        state.leases.as_ref(),
        state.exporters.as_ref(),
        state.clients.as_ref(),
        state.policies.as_ref(),
        namespace,
        name,
    )
    .await
    .map_err(|e| ControllerError::Internal(e.to_string()))?;

    if let Some(delay) = outcome.requeue_after {
        let queue = state.lease_queue.clone();
        let namespace = namespace.to_string();
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(namespace, name);
        });
    }

    Ok(outcome.lease)
}

/// Sorts by name and slices a page out of an already-fetched list (§4.1 pagination). The
/// in-memory store has no durable cursor, so the "token" is simply the last name returned.
pub fn paginate<T: crate::store::HasMeta>(mut items: Vec<T>, page_size: i32, page_token: &str) -> (Vec<T>, String) {
    items.sort_by(|a, b| a.meta().name.cmp(&b.meta().name));
    let start = if page_token.is_empty() {
        0
    } else {
        items.iter().position(|i| i.meta().name.as_str() > page_token).unwrap_or(items.len())
    };
    let mut remaining = items.split_off(start);
    if page_size <= 0 || remaining.len() <= page_size as usize {
        (remaining, String::new())
    } else {
        remaining.truncate(page_size as usize);
        let next_token = remaining.last().map(|i| i.meta().name.clone()).unwrap_or_default();
        (remaining, next_token)
    }
}

pub use client_service::ClientServiceImpl;
pub use controller_service::ControllerServiceImpl;
pub use router_service::RouterServiceImpl;

/// Shared application state every RPC handler closes over. Grouped behind one `Arc`-cloneable
/// struct so constructing each service impl in `main.rs` is a single clone, not five.
#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<dyn crate::store::ObjectStore<crate::model::Client>>,
    pub exporters: Arc<dyn crate::store::ObjectStore<crate::model::Exporter>>,
    pub leases: Arc<dyn crate::store::ObjectStore<crate::model::Lease>>,
    pub policies: Arc<dyn crate::store::ObjectStore<crate::model::ExporterAccessPolicy>>,
    pub authenticator: Arc<Authenticator>,
    pub signer: Arc<crate::auth::Signer>,
    pub username_prefix: String,
    pub listen_registry: Arc<crate::exporter::ListenRegistry>,
    pub stream_tokens: Arc<crate::router::StreamTokenIssuer>,
    pub peer_registry: Arc<crate::router::PeerRegistry>,
    pub router_endpoint: String,
    pub lease_queue: crate::workers::ReconcileQueue,
}
