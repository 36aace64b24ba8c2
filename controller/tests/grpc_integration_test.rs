//! Black-box test of the gRPC surface over a real socket, grounded on the
//! `kafka-sidecar` integration test's bind-serve-connect pattern: an ephemeral
//! `TcpListener`, a backgrounded `Server::builder()...serve_with_incoming`, then a client
//! `Channel` dialing the bound address.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tonic::Request;

use controller::auth::{Authenticator, Signer};
use controller::exporter::ListenRegistry;
use controller::grpc::{AppState, ClientServiceImpl, ControllerServiceImpl, RouterServiceImpl};
use controller::model::{
    Client, Condition, Exporter, ExporterAccessPolicy, ExporterStatus, Lease, ObjectMeta, PolicyEntry, PolicyFrom,
    CONDITION_ONLINE,
};
use controller::router::{PeerRegistry, StreamTokenIssuer};
use controller::store::{MemoryStore, ObjectStore};
use controller::workers::ReconcileQueue;

use controller_proto::client_service_client::ClientServiceClient;
use controller_proto::client_service_server::ClientServiceServer;
use controller_proto::controller_service_server::ControllerServiceServer;
use controller_proto::router_service_server::RouterServiceServer;
use controller_proto::{CreateLeaseRequest, GetLeaseRequest, Lease as ProtoLease, UpdateLeaseRequest};

const NAMESPACE: &str = "lab1";

struct Harness {
    addr: std::net::SocketAddr,
    signer: Arc<Signer>,
    prefix: String,
    client_record: Client,
}

/// Builds every component `AppState` needs directly (bypassing `controller::run`, which also
/// wires up the lifecycle manager and metrics listener that this test has no use for) and binds
/// a listener, but does not start serving yet.
async fn build() -> (Harness, TcpListener, AppState) {
    let clients = Arc::new(MemoryStore::<Client>::new());
    let exporters = Arc::new(MemoryStore::<Exporter>::new());
    let leases = Arc::new(MemoryStore::<Lease>::new());
    let policies = Arc::new(MemoryStore::<ExporterAccessPolicy>::new());

    let prefix = "internal:".to_string();
    let signer = Arc::new(Signer::new(b"integration-test-seed", "https://ctl.test/", "jumpstarter", prefix.clone()));
    let authenticator = Arc::new(Authenticator::new(signer.clone(), Vec::new()));

    let client_record = Client {
        meta: ObjectMeta::new(NAMESPACE, "c1"),
        username_override: None,
        endpoint: String::new(),
    };
    clients.create(client_record.clone()).await.unwrap();

    let mut exporter_record = Exporter {
        meta: ObjectMeta::new(NAMESPACE, "e1"),
        username_override: None,
        status: ExporterStatus::default(),
    };
    exporter_record.status.conditions.push(Condition::new(CONDITION_ONLINE, true, "Connect", "listen stream open"));
    exporters.create(exporter_record).await.unwrap();

    let policy_record = ExporterAccessPolicy {
        meta: ObjectMeta::new(NAMESPACE, "allow-all"),
        exporter_selector: String::new(),
        policies: vec![PolicyEntry {
            priority: 0,
            from: vec![PolicyFrom {
                client_selector: String::new(),
            }],
            maximum_duration_seconds: Some(3600),
            spot_access: false,
        }],
    };
    policies.create(policy_record).await.unwrap();

    let clients: Arc<dyn ObjectStore<Client>> = clients;
    let exporters: Arc<dyn ObjectStore<Exporter>> = exporters;
    let leases: Arc<dyn ObjectStore<Lease>> = leases;
    let policies: Arc<dyn ObjectStore<ExporterAccessPolicy>> = policies;

    let lease_queue = ReconcileQueue::spawn(2, tokio_util::sync::CancellationToken::new(), {
        let leases = leases.clone();
        let exporters = exporters.clone();
        let clients = clients.clone();
        let policies = policies.clone();
        move |namespace: String, name: String| {
            let leases = leases.clone();
            let exporters = exporters.clone();
            let clients = clients.clone();
            let policies = policies.clone();
            async move {
                controller::lease::reconcile_once(leases.as_ref(), exporters.as_ref(), clients.as_ref(), policies.as_ref(), &namespace, &name)
                    .await
                    .ok()
                    .and_then(|outcome| outcome.requeue_after)
            }
        }
    });

    let app_state = AppState {
        clients,
        exporters,
        leases,
        policies,
        authenticator,
        signer: signer.clone(),
        username_prefix: prefix.clone(),
        listen_registry: Arc::new(ListenRegistry::new()),
        stream_tokens: Arc::new(StreamTokenIssuer::new(b"stream-secret".to_vec())),
        peer_registry: Arc::new(PeerRegistry::new()),
        router_endpoint: "127.0.0.1:0".to_string(),
        lease_queue,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    (
        Harness {
            addr,
            signer,
            prefix,
            client_record,
        },
        listener,
        app_state,
    )
}

async fn serve_in_background(listener: TcpListener, app_state: AppState) {
    tokio::spawn(async move {
        Server::builder()
            .add_service(ClientServiceServer::new(ClientServiceImpl::new(app_state.clone())))
            .add_service(ControllerServiceServer::new(ControllerServiceImpl::new(app_state.clone())))
            .add_service(RouterServiceServer::new(RouterServiceImpl::new(app_state)))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn client_token(harness: &Harness) -> String {
    let subject = format!("{}{}", harness.prefix, harness.client_record.internal_subject());
    harness.signer.token(&subject).unwrap()
}

fn authed_request<T>(message: T, token: &str) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    request
}

#[tokio::test]
async fn create_lease_binds_to_the_online_exporter() {
    let (harness, listener, app_state) = build().await;
    serve_in_background(listener, app_state).await;

    let channel = Channel::from_shared(format!("http://{}", harness.addr))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = ClientServiceClient::new(channel);
    let token = client_token(&harness);

    let request = authed_request(
        CreateLeaseRequest {
            parent: format!("namespaces/{NAMESPACE}"),
            lease: Some(ProtoLease {
                name: String::new(),
                namespace: String::new(),
                uid: String::new(),
                resource_version: 0,
                labels: Default::default(),
                annotations: Default::default(),
                client_ref: "c1".to_string(),
                selector: "!nonexistent".to_string(),
                duration_seconds: Some(120),
                begin_time_unix_nanos: None,
                end_time_unix_nanos: None,
                release: false,
                status: None,
            }),
            lease_id: Some("l1".to_string()),
        },
        &token,
    );

    let response = client.create_lease(request).await.unwrap().into_inner();
    assert!(response.status.as_ref().unwrap().conditions.iter().any(|c| c.r#type == "Ready" && c.status));
    assert_eq!(response.status.as_ref().unwrap().exporter_ref.as_deref(), Some("e1"));
    // maximumDurationSeconds clamps the requested 120s down to the policy's 3600s cap only if
    // smaller; here the request is already under the cap so it passes through unchanged.
    assert_eq!(response.duration_seconds, Some(120));

    let get_request = authed_request(
        GetLeaseRequest {
            name: format!("namespaces/{NAMESPACE}/leases/l1"),
        },
        &token,
    );
    let fetched = client.get_lease(get_request).await.unwrap().into_inner();
    assert_eq!(fetched.name, "l1");
}

#[tokio::test]
async fn create_lease_without_a_token_is_unauthenticated() {
    let (harness, listener, app_state) = build().await;
    serve_in_background(listener, app_state).await;

    let channel = Channel::from_shared(format!("http://{}", harness.addr))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = ClientServiceClient::new(channel);

    let request = Request::new(CreateLeaseRequest {
        parent: format!("namespaces/{NAMESPACE}"),
        lease: Some(ProtoLease {
            name: String::new(),
            namespace: String::new(),
            uid: String::new(),
            resource_version: 0,
            labels: Default::default(),
            annotations: Default::default(),
            client_ref: "c1".to_string(),
            selector: "!nonexistent".to_string(),
            duration_seconds: Some(120),
            begin_time_unix_nanos: None,
            end_time_unix_nanos: None,
            release: false,
            status: None,
        }),
        lease_id: Some("l2".to_string()),
    });

    let status = client.create_lease(request).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unauthenticated);
}

#[tokio::test]
async fn update_lease_duration_is_reclamped_against_the_bound_policy() {
    let (harness, listener, app_state) = build().await;
    serve_in_background(listener, app_state).await;

    let channel = Channel::from_shared(format!("http://{}", harness.addr))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = ClientServiceClient::new(channel);
    let token = client_token(&harness);

    let create_request = authed_request(
        CreateLeaseRequest {
            parent: format!("namespaces/{NAMESPACE}"),
            lease: Some(ProtoLease {
                name: String::new(),
                namespace: String::new(),
                uid: String::new(),
                resource_version: 0,
                labels: Default::default(),
                annotations: Default::default(),
                client_ref: "c1".to_string(),
                selector: "!nonexistent".to_string(),
                duration_seconds: Some(120),
                begin_time_unix_nanos: None,
                end_time_unix_nanos: None,
                release: false,
                status: None,
            }),
            lease_id: Some("l4".to_string()),
        },
        &token,
    );
    let created = client.create_lease(create_request).await.unwrap().into_inner();
    assert_eq!(created.duration_seconds, Some(120));

    // Bound now, and the owning policy caps at 3600s; asking for far more than that on Update
    // must come back clamped rather than passed through as-is.
    let mut updated = created;
    updated.duration_seconds = Some(999_999);
    let update_request = authed_request(UpdateLeaseRequest { lease: Some(updated) }, &token);
    let response = client.update_lease(update_request).await.unwrap().into_inner();
    assert_eq!(response.duration_seconds, Some(3600));
}

#[tokio::test]
async fn get_lease_owned_by_someone_else_is_permission_denied() {
    let (harness, listener, app_state) = build().await;
    serve_in_background(listener, app_state).await;

    let channel = Channel::from_shared(format!("http://{}", harness.addr))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = ClientServiceClient::new(channel);
    let owner_token = client_token(&harness);

    let create_request = authed_request(
        CreateLeaseRequest {
            parent: format!("namespaces/{NAMESPACE}"),
            lease: Some(ProtoLease {
                name: String::new(),
                namespace: String::new(),
                uid: String::new(),
                resource_version: 0,
                labels: Default::default(),
                annotations: Default::default(),
                client_ref: "c1".to_string(),
                selector: "!nonexistent".to_string(),
                duration_seconds: Some(120),
                begin_time_unix_nanos: None,
                end_time_unix_nanos: None,
                release: false,
                status: None,
            }),
            lease_id: Some("l3".to_string()),
        },
        &owner_token,
    );
    client.create_lease(create_request).await.unwrap();

    // A valid token for an unrelated client identity: authenticates fine, but doesn't match
    // the lease's `clientRef` (c1), so ownership authorization must reject it.
    let other_client = Client {
        meta: ObjectMeta::new(NAMESPACE, "c2"),
        username_override: None,
        endpoint: String::new(),
    };
    let other_token = harness.signer.token(&format!("{}{}", harness.prefix, other_client.internal_subject())).unwrap();

    let get_request = authed_request(
        GetLeaseRequest {
            name: format!("namespaces/{NAMESPACE}/leases/l3"),
        },
        &other_token,
    );
    let status = client.get_lease(get_request).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::PermissionDenied);
}
