//! Minimal field sets for each watched Kubernetes kind (section 3, 6).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One of the fifteen kinds the object cache indexes (section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Service,
    EndpointSlice,
    Secret,
    Ingress,
    HttpProxy,
    TlsCertificateDelegation,
    ExtensionService,
    Gateway,
    GatewayClass,
    HttpRoute,
    TlsRoute,
    TcpRoute,
    GrpcRoute,
    ReferenceGrant,
    Namespace,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Service => "Service",
            ObjectKind::EndpointSlice => "EndpointSlice",
            ObjectKind::Secret => "Secret",
            ObjectKind::Ingress => "Ingress",
            ObjectKind::HttpProxy => "HTTPProxy",
            ObjectKind::TlsCertificateDelegation => "TLSCertificateDelegation",
            ObjectKind::ExtensionService => "ExtensionService",
            ObjectKind::Gateway => "Gateway",
            ObjectKind::GatewayClass => "GatewayClass",
            ObjectKind::HttpRoute => "HTTPRoute",
            ObjectKind::TlsRoute => "TLSRoute",
            ObjectKind::TcpRoute => "TCPRoute",
            ObjectKind::GrpcRoute => "GRPCRoute",
            ObjectKind::ReferenceGrant => "ReferenceGrant",
            ObjectKind::Namespace => "Namespace",
        }
    }
}

/// `(kind, namespace, name)` — the cache key and the stable cross-reference
/// identifier used everywhere else in the DAG (section 3: "by stable
/// identifier, never... an in-memory pointer").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.into(), name: name.into() }
    }

    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind.as_str(), self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub ports: Vec<ServicePort>,
}

impl Service {
    pub fn port(&self, selector: &PortSelector) -> Option<&ServicePort> {
        match selector {
            PortSelector::Number(n) => self.ports.iter().find(|p| p.port == *n),
            PortSelector::Name(name) => {
                self.ports.iter().find(|p| p.name.as_deref() == Some(name.as_str()))
            }
        }
    }
}

/// How a route backend names the Service port it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortSelector {
    Number(u16),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub ip: String,
    pub port: u16,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSlice {
    pub namespace: String,
    /// The Service this slice backs; EndpointSlices are named independently
    /// of their Service but always carry the `kubernetes.io/service-name`
    /// label in the real API. This crate stores the resolved link directly.
    pub service_name: String,
    pub port_name: Option<String>,
    pub addresses: Vec<EndpointAddress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretKind {
    TlsCertificate,
    CertificateAuthorityBundle,
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    pub kind: SecretKind,
    /// PEM-encoded certificate chain (for `TlsCertificate`/`CertificateAuthorityBundle`).
    pub certificate_chain: Option<String>,
    /// PEM-encoded private key (for `TlsCertificate`).
    pub private_key: Option<String>,
    /// Raw opaque payload, used for `Opaque` secrets that are referenced but
    /// not otherwise interpreted by the builder.
    pub data: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCertificateDelegation {
    pub namespace: String,
    pub name: String,
    /// Secret name in `namespace` being delegated, and the namespaces
    /// permitted to reference it.
    pub delegations: Vec<(String, Vec<String>)>,
}

impl TlsCertificateDelegation {
    pub fn permits(&self, secret_name: &str, consumer_namespace: &str) -> bool {
        self.delegations.iter().any(|(name, targets)| {
            name == secret_name
                && (targets.iter().any(|t| t == "*") || targets.iter().any(|t| t == consumer_namespace))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionService {
    pub namespace: String,
    pub name: String,
    pub service: ObjectRef,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
}

// --- Ingress -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub host: Option<String>,
    pub path: String,
    pub path_type_exact: bool,
    pub backend_service: String,
    pub backend_port: PortSelector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingress {
    pub namespace: String,
    pub name: String,
    /// `spec.ingressClassName`.
    pub spec_class: Option<String>,
    /// The `kubernetes.io/ingress.class` annotation; authoritative over
    /// `spec_class` when both are set and differ (Open Question in section 9 —
    /// the source treats the annotation as authoritative for backwards
    /// compatibility; this crate preserves that and flags the mismatch as a
    /// deprecation warning rather than an error).
    pub annotation_class: Option<String>,
    pub tls_hosts: Vec<(String, String)>, // (host, secret name)
    pub rules: Vec<IngressRule>,
}

impl Ingress {
    /// Resolves the effective class, surfacing whether the two disagreed.
    pub fn effective_class(&self) -> (Option<&str>, bool) {
        match (&self.annotation_class, &self.spec_class) {
            (Some(a), Some(s)) if a != s => (Some(a.as_str()), true),
            (Some(a), _) => (Some(a.as_str()), false),
            (None, Some(s)) => (Some(s.as_str()), false),
            (None, None) => (None, false),
        }
    }
}

// --- HTTPProxy -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProxyService {
    pub name: String,
    pub port: u16,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathCondition {
    Prefix(String),
    Exact(String),
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderConditionOp {
    Present,
    Contains(String),
    NotContains(String),
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderCondition {
    pub name: String,
    pub op: HeaderConditionOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProxyRoute {
    pub path: PathCondition,
    pub headers: Vec<HeaderCondition>,
    pub services: Vec<HttpProxyService>,
    pub prefix_rewrite: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub websocket: bool,
    pub mirror_services: Vec<String>,
    pub permit_insecure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProxyInclude {
    pub name: String,
    pub namespace: Option<String>,
    pub condition_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProxy {
    pub namespace: String,
    pub name: String,
    /// `spec.virtualhost.fqdn`, present only on a "root" proxy.
    pub fqdn: Option<String>,
    pub tls_secret_name: Option<String>,
    pub enable_fallback_certificate: bool,
    pub includes: Vec<HttpProxyInclude>,
    pub routes: Vec<HttpProxyRoute>,
    pub rate_limit_policy: Option<RateLimitPolicy>,
    pub cors_policy: Option<CorsPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub requests_per_unit: u32,
    pub unit_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsPolicy {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_credentials: bool,
}

// --- Gateway API ---------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayClass {
    pub name: String,
    pub controller_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayListener {
    pub name: String,
    pub hostname: Option<String>,
    pub port: u16,
    pub tls_secret_ref: Option<ObjectRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub namespace: String,
    pub name: String,
    pub gateway_class_name: String,
    pub listeners: Vec<GatewayListener>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRoute {
    pub namespace: String,
    pub name: String,
    pub parent_gateways: Vec<ObjectRef>,
    pub hostnames: Vec<String>,
    pub routes: Vec<HttpProxyRoute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsRoute {
    pub namespace: String,
    pub name: String,
    pub parent_gateways: Vec<ObjectRef>,
    pub hostnames: Vec<String>,
    pub backend_service: String,
    pub backend_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpRoute {
    pub namespace: String,
    pub name: String,
    pub parent_gateways: Vec<ObjectRef>,
    pub backend_service: String,
    pub backend_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcRoute {
    pub namespace: String,
    pub name: String,
    pub parent_gateways: Vec<ObjectRef>,
    pub hostnames: Vec<String>,
    pub routes: Vec<HttpProxyRoute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceGrant {
    pub namespace: String,
    pub name: String,
    pub from_kind: ObjectKind,
    pub from_namespace: String,
    pub to_kind: ObjectKind,
    pub to_name: Option<String>,
}

impl ReferenceGrant {
    pub fn permits(&self, from_namespace: &str, to_kind: ObjectKind, to_name: &str) -> bool {
        self.from_namespace == from_namespace
            && self.to_kind == to_kind
            && self.to_name.as_deref().map(|n| n == to_name).unwrap_or(true)
    }
}
