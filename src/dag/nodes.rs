//! DAG node types (section 3). Every node here is immutable once a build
//! pass completes and cross-references are stable string keys, never
//! in-memory pointers, so a `Dag` can be handed to observers by value and
//! discarded wholesale on the next rebuild (section 3 "Relationships &
//! ownership", design notes "Cyclic / shared references").

use std::collections::BTreeMap;

use crate::domain::{CorsPolicy as DomainCorsPolicy, ObjectRef, RateLimitPolicy};

pub type ClusterKey = String;
pub type SecretKey = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatch {
    Prefix(String),
    Exact(String),
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderMatch {
    Present(String),
    Contains(String, String),
    NotContains(String, String),
    Exact(String, String),
}

/// A route's full match predicate: one path condition, AND-composed with
/// zero or more header conditions (section 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub path: PathMatch,
    pub headers: Vec<HeaderMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedCluster {
    pub cluster: ClusterKey,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderPolicy {
    pub request_headers_to_add: Vec<(String, String)>,
    pub request_headers_to_remove: Vec<String>,
    pub response_headers_to_add: Vec<(String, String)>,
    pub response_headers_to_remove: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Route to a (possibly single-element) weighted cluster set.
    Forward {
        clusters: Vec<WeightedCluster>,
        prefix_rewrite: Option<String>,
        timeout_seconds: Option<u64>,
        retry_attempts: Option<u32>,
        websocket: bool,
        mirror_clusters: Vec<ClusterKey>,
    },
    /// Synthesized when a backend Service/port cannot be resolved (section
    /// 4.B pass 6): the route stays in the DAG so sibling routes and `/`
    /// fallthrough keep working, but it always answers 503.
    DirectResponse { status: u16 },
    Redirect { https: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub r#match: RouteMatch,
    pub action: RouteAction,
    pub header_policy: HeaderPolicy,
    /// Set when the route's backend Service/port could not be resolved;
    /// carried alongside the synthesized 503 so the status writer can
    /// explain why (section 4.B pass 6, section 8 scenario 4).
    pub resolution_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpProxy {
    pub clusters: Vec<WeightedCluster>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureVirtualHostExtras {
    pub secret: SecretKey,
    pub minimum_protocol_version: crate::config::TlsProtocolVersion,
    pub maximum_protocol_version: crate::config::TlsProtocolVersion,
    pub cipher_suites: Vec<String>,
    pub fallback_certificate: bool,
    /// Set when TLS resolution failed (missing/invalid secret, or
    /// delegation not granted): the vhost still gets a listener filter
    /// chain (to avoid 404-on-port-443 for unrelated hosts) but its routes
    /// serve 503 (section 4.B pass 7).
    pub invalid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualHost {
    pub fqdn: String,
    pub routes: Vec<Route>,
    pub cors_policy: Option<DomainCorsPolicy>,
    pub rate_limit_policy: Option<RateLimitPolicy>,
    pub header_policy: HeaderPolicy,
    pub secure: Option<SecureVirtualHostExtras>,
    /// Present when the vhost is a TLS-passthrough target instead of a
    /// terminating secure vhost (section 3 "TCPProxy").
    pub tcp_proxy: Option<TcpProxy>,
    /// The source object(s) that contributed to this vhost, for status
    /// reporting when a conflict is detected.
    pub sources: Vec<ObjectRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancingPolicy {
    RoundRobin,
    WeightedLeastRequest,
    Random,
    RequestHash,
    CookieHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamProtocol {
    Http,
    H2c,
    H2,
    Tls,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTls {
    pub ca_secret: Option<SecretKey>,
    pub sni: Option<String>,
    pub subject_names: Vec<String>,
    pub client_cert_secret: Option<SecretKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub path: String,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreaker {
    pub max_connections: u32,
    pub max_pending_requests: u32,
    pub max_requests: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub key: ClusterKey,
    pub service: ObjectRef,
    pub port: u16,
    pub load_balancing: LoadBalancingPolicy,
    pub protocol: UpstreamProtocol,
    pub upstream_tls: Option<UpstreamTls>,
    pub health_check: Option<HealthCheck>,
    pub circuit_breaker: Option<CircuitBreaker>,
    pub include_unready_endpoints: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    pub cluster: ClusterKey,
    pub ready: Vec<Endpoint>,
    pub unready: Vec<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretMaterial {
    Certificate { chain_pem: String, private_key_pem: String },
    CaBundle { trusted_ca_pem: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    pub key: SecretKey,
    pub source: ObjectRef,
    pub material: SecretMaterial,
    /// `sha256` prefix of the material, used to content-namespace the SDS
    /// name so a rotation produces a new name and forces a clean reload
    /// (section 4.C "Secret cache").
    pub content_hash_prefix: String,
}

/// The complete output of one builder pass (section 3 "DAG nodes").
/// Iteration over any map here must be done in sorted-key order before
/// being embedded in xDS output, per the determinism requirement in
/// section 4.B — callers get that for free since these are `BTreeMap`s.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    pub insecure_virtual_hosts: BTreeMap<String, VirtualHost>,
    pub secure_virtual_hosts: BTreeMap<String, VirtualHost>,
    pub clusters: BTreeMap<ClusterKey, Cluster>,
    pub endpoints: BTreeMap<ClusterKey, EndpointSet>,
    pub secrets: BTreeMap<SecretKey, Secret>,
}

impl Dag {
    pub fn cluster_key(service: &ObjectRef, port: u16) -> ClusterKey {
        format!("{}/{}/{}", service.namespace, service.name, port)
    }
}
