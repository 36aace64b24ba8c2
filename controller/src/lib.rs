pub mod auth;
pub mod config;
pub mod error;
pub mod exporter;
pub mod grpc;
pub mod identifier;
pub mod lease;
pub mod model;
pub mod policy;
pub mod router;
pub mod selector;
pub mod store;
pub mod workers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use lifecycle::{ComponentOptions, LivenessHandler, Manager, ReadinessHandler};
use tonic::transport::Server;

use auth::{Authenticator, ExternalVerifier, Signer, VerifierConfig};
use config::Config;
use controller_proto::client_service_server::ClientServiceServer;
use controller_proto::controller_service_server::ControllerServiceServer;
use controller_proto::router_service_server::RouterServiceServer;
use exporter::ListenRegistry;
use grpc::{AppState, ClientServiceImpl, ControllerServiceImpl, RouterServiceImpl};
use model::{Client, Exporter, ExporterAccessPolicy, Lease};
use router::{PeerRegistry, StreamTokenIssuer};
use store::{MemoryStore, ObjectStore};

#[derive(Clone)]
struct ProbeState {
    readiness: ReadinessHandler,
    liveness: LivenessHandler,
    signer: Arc<Signer>,
}

async fn readiness(State(state): State<ProbeState>) -> StatusCode {
    state.readiness.check().await
}

async fn liveness(State(state): State<ProbeState>) -> StatusCode {
    state.liveness.check().await
}

async fn openid_configuration(State(state): State<ProbeState>) -> Json<serde_json::Value> {
    Json(state.signer.discovery_document())
}

async fn jwks(State(state): State<ProbeState>) -> Json<serde_json::Value> {
    Json(state.signer.jwks())
}

/// Builds every component and serves the gRPC surface until the process is asked to shut down
/// (§10). Split out of `main` so integration tests can drive the same wiring over a real socket
/// instead of reimplementing it ad hoc.
pub async fn run(config: Config) -> Result<()> {
    tracing::info!(
        grpc_bind = %config.grpc_bind,
        metrics_bind = %config.metrics_bind,
        router_endpoint = %config.router_endpoint,
        "starting jumpstarter-controller"
    );

    let grpc_addr: SocketAddr = config.grpc_bind.parse().context("parsing GRPC_BIND")?;
    let listener = tokio::net::TcpListener::bind(grpc_addr)
        .await
        .with_context(|| format!("binding {grpc_addr}"))?;
    serve(config, listener).await
}

/// Same wiring as [`run`], but serving on an already-bound listener (so a test can bind an
/// ephemeral port and learn its address before the server starts accepting).
pub async fn serve(config: Config, listener: tokio::net::TcpListener) -> Result<()> {
    let clients: Arc<dyn ObjectStore<Client>> = Arc::new(MemoryStore::<Client>::new());
    let exporters: Arc<dyn ObjectStore<Exporter>> = Arc::new(MemoryStore::<Exporter>::new());
    let leases: Arc<dyn ObjectStore<Lease>> = Arc::new(MemoryStore::<Lease>::new());
    let policies: Arc<dyn ObjectStore<ExporterAccessPolicy>> = Arc::new(MemoryStore::<ExporterAccessPolicy>::new());

    let signer = Arc::new(Signer::new(
        config.signing_seed.as_bytes(),
        config.issuer_url.clone(),
        config.audience.clone(),
        config.username_prefix.clone(),
    ));

    let http = reqwest::Client::new();
    let mut externals = Vec::new();
    for issuer_url in config.oidc_issuer_urls() {
        let verifier_config = VerifierConfig {
            issuer_url: issuer_url.clone(),
            audiences: vec![config.audience.clone()],
            claim_mapping: Default::default(),
            username_prefix: String::new(),
        };
        match ExternalVerifier::discover(&verifier_config, &http).await {
            Ok(verifier) => externals.push(verifier),
            Err(e) => tracing::warn!(issuer = %issuer_url, error = ?e, "failed to discover OIDC issuer, skipping"),
        }
    }
    let authenticator = Arc::new(Authenticator::new(signer.clone(), externals));

    let listen_registry = Arc::new(ListenRegistry::new());
    let stream_tokens = Arc::new(StreamTokenIssuer::new(config.stream_token_secret.clone().into_bytes()));
    let peer_registry = Arc::new(PeerRegistry::new());

    let mut manager = Manager::builder("jumpstarter-controller").build();
    let grpc_handle = manager.register("grpc-server", ComponentOptions::new().with_graceful_shutdown(Duration::from_secs(30)));
    let lease_handle = manager.register("lease-reconciler", ComponentOptions::new().with_graceful_shutdown(Duration::from_secs(10)));
    let probe_state = ProbeState {
        readiness: manager.readiness_handler(),
        liveness: manager.liveness_handler(),
        signer: signer.clone(),
    };

    let lease_queue = workers::ReconcileQueue::spawn(config.lease_workers, lease_handle.cancellation_token(), {
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
                match lease::reconcile_once(leases.as_ref(), exporters.as_ref(), clients.as_ref(), policies.as_ref(), &namespace, &name).await {
                    Ok(outcome) => outcome.requeue_after,
                    Err(e) => {
                        tracing::warn!(%namespace, %name, error = %e, "lease reconcile failed, retrying");
                        Some(Duration::from_secs(5))
                    }
                }
            }
        }
    });
    tokio::spawn(async move {
        lease_handle.shutdown_recv().await;
        lease_handle.work_completed();
    });

    let app_state = AppState {
        clients,
        exporters,
        leases,
        policies,
        authenticator,
        signer: signer.clone(),
        username_prefix: config.username_prefix.clone(),
        listen_registry,
        stream_tokens,
        peer_registry,
        router_endpoint: config.router_endpoint.clone(),
        lease_queue,
    };

    let metrics_router = common_metrics::setup_metrics_routes(
        Router::new()
            .route("/_readiness", get(readiness))
            .route("/_liveness", get(liveness))
            .route("/.well-known/openid-configuration", get(openid_configuration))
            .route("/jwks", get(jwks))
            .with_state(probe_state),
    );
    tokio::spawn({
        let metrics_bind = config.metrics_bind.clone();
        async move {
            if let Err(e) = common_metrics::serve(metrics_router, &metrics_bind).await {
                tracing::error!(error = %e, "metrics server exited");
            }
        }
    });

    let monitor = manager.monitor_background();

    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
    let serve_result = Server::builder()
        .add_service(ClientServiceServer::new(ClientServiceImpl::new(app_state.clone())))
        .add_service(ControllerServiceServer::new(ControllerServiceImpl::new(app_state.clone())))
        .add_service(RouterServiceServer::new(RouterServiceImpl::new(app_state)))
        .serve_with_incoming_shutdown(incoming, grpc_handle.shutdown_recv())
        .await;
    grpc_handle.work_completed();
    serve_result.context("gRPC server failed")?;

    monitor.wait().await.context("lifecycle shutdown did not complete cleanly")?;
    Ok(())
}
