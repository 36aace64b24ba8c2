//! Environment-driven configuration (§10), following the same `envconfig` derive the other
//! services in this workspace use to load their settings from the process environment.

use envconfig::Envconfig;
use tracing::Level;

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    /// Address the gRPC server (`ClientService`, `ControllerService`, `RouterService`) binds.
    #[envconfig(from = "GRPC_BIND", default = "0.0.0.0:8082")]
    pub grpc_bind: String,

    /// Address the Prometheus `/metrics` endpoint and the readiness/liveness probes bind.
    #[envconfig(from = "METRICS_BIND", default = "0.0.0.0:8081")]
    pub metrics_bind: String,

    /// Address clients and exporters are told to dial for `RouterService::Stream` (§4.7). Must
    /// be externally reachable; not necessarily the same as `grpc_bind` behind a load balancer.
    #[envconfig(from = "ROUTER_ENDPOINT", default = "127.0.0.1:8082")]
    pub router_endpoint: String,

    /// Prefix distinguishing internally-minted subjects (`internal:client:...`,
    /// `internal:exporter:...`) from external OIDC subjects (§4.2, §4.3).
    #[envconfig(from = "USERNAME_PREFIX", default = "internal:")]
    pub username_prefix: String,

    /// Issuer URL published in the controller's own OIDC discovery document and embedded in
    /// internally-minted JWTs (§4.2).
    #[envconfig(from = "ISSUER_URL", default = "https://jumpstarter-controller/")]
    pub issuer_url: String,

    /// Audience embedded in, and required of, internally-minted JWTs.
    #[envconfig(from = "AUDIENCE", default = "jumpstarter")]
    pub audience: String,

    /// Seed the internal ES256 signing key is deterministically derived from (§4.2). Every
    /// replica must be started with the same seed.
    #[envconfig(from = "SIGNING_SEED")]
    pub signing_seed: String,

    /// Shared HS256 secret for stream-JWTs minted by Dial and verified by the router (§4.7).
    #[envconfig(from = "STREAM_TOKEN_SECRET")]
    pub stream_token_secret: String,

    /// Comma-separated list of external OIDC issuer URLs to additionally accept tokens from.
    /// Empty means only the internal signer is trusted.
    #[envconfig(from = "OIDC_ISSUERS", default = "")]
    pub oidc_issuers: String,

    /// Worker pool size for the lease reconcile queue (§5).
    #[envconfig(from = "LEASE_WORKERS", default = "4")]
    pub lease_workers: usize,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: Level,
}

impl Config {
    pub fn oidc_issuer_urls(&self) -> Vec<String> {
        self.oidc_issuers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
