//! Configuration structure for the control plane.
//!
//! Covers exactly the inputs enumerated in the external-interfaces section of
//! the specification: namespace/class filters, TLS defaults, rate-limit
//! service binding, timeouts, access-log shape, leader-election tuning, and
//! the Envoy listener/xDS-server bind addresses.

use crate::errors::{ContourError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub ingress: IngressConfig,
    #[validate(nested)]
    pub tls: TlsDefaultsConfig,
    #[validate(nested)]
    pub rate_limit_service: Option<RateLimitServiceConfig>,
    #[validate(nested)]
    pub timeouts: TimeoutsConfig,
    #[validate(nested)]
    pub access_log: AccessLogConfig,
    #[validate(nested)]
    pub leader_election: LeaderElectionConfig,
    #[validate(nested)]
    pub envoy: EnvoyListenersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ingress: IngressConfig::default(),
            tls: TlsDefaultsConfig::default(),
            rate_limit_service: None,
            timeouts: TimeoutsConfig::default(),
            access_log: AccessLogConfig::default(),
            leader_election: LeaderElectionConfig::default(),
            envoy: EnvoyListenersConfig::default(),
        }
    }
}

impl AppConfig {
    /// Validate field-level constraints plus cross-field invariants that
    /// `validator`'s derive macro cannot express on its own.
    pub fn validate_all(&self) -> Result<()> {
        self.validate().map_err(|e| ContourError::config(format!("invalid configuration: {e}")))?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.server.xds_port == self.server.admin_port {
            return Err(ContourError::config(
                "server.xds_port and server.admin_port must differ",
            ));
        }
        if self.tls.minimum_protocol_version > self.tls.maximum_protocol_version {
            return Err(ContourError::config(
                "tls.minimum_protocol_version must not exceed tls.maximum_protocol_version",
            ));
        }
        for field in &self.access_log.fields {
            if !ACCESS_LOG_FIELD_NAMES.contains(&field.as_str()) {
                return Err(ContourError::config(format!(
                    "unknown accessLogFields entry: {field}"
                )));
            }
        }
        Ok(())
    }
}

/// Bind addresses for the xDS gRPC server and the admin/debug endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    pub xds_address: String,
    #[validate(range(min = 1, max = 65535))]
    pub xds_port: u16,
    pub admin_address: String,
    #[validate(range(min = 1, max = 65535))]
    pub admin_port: u16,
    /// Fixed node-hash: the same identity presented to every connecting Envoy.
    pub node_hash: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            xds_address: "0.0.0.0".to_string(),
            xds_port: 8001,
            admin_address: "127.0.0.1".to_string(),
            admin_port: 8002,
            node_hash: "contour".to_string(),
        }
    }
}

/// `rootNamespaces` / `ingressClassName` / `gatewayControllerName`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IngressConfig {
    pub root_namespaces: BTreeSet<String>,
    pub ingress_class_names: BTreeSet<String>,
    pub gateway_controller_name: Option<String>,
    pub disable_permit_insecure: bool,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            root_namespaces: BTreeSet::new(),
            ingress_class_names: BTreeSet::new(),
            gateway_controller_name: None,
            disable_permit_insecure: false,
        }
    }
}

impl IngressConfig {
    /// Empty root-namespace set means "any namespace may host a root".
    pub fn allows_root_namespace(&self, namespace: &str) -> bool {
        self.root_namespaces.is_empty() || self.root_namespaces.contains(namespace)
    }

    pub fn allows_ingress_class(&self, class: Option<&str>) -> bool {
        if self.ingress_class_names.is_empty() {
            return true;
        }
        match class {
            Some(c) => self.ingress_class_names.contains(c),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsProtocolVersion {
    V1_2,
    V1_3,
}

/// `tls.minimumProtocolVersion`, `tls.maximumProtocolVersion`, `tls.cipherSuites`,
/// `tls.fallbackCertificate`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TlsDefaultsConfig {
    pub minimum_protocol_version: TlsProtocolVersion,
    pub maximum_protocol_version: TlsProtocolVersion,
    pub cipher_suites: Vec<String>,
    pub fallback_certificate: Option<NamespacedName>,
}

impl Default for TlsDefaultsConfig {
    fn default() -> Self {
        Self {
            minimum_protocol_version: TlsProtocolVersion::V1_2,
            maximum_protocol_version: TlsProtocolVersion::V1_3,
            cipher_suites: Vec::new(),
            fallback_certificate: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

/// `rateLimitService: {extensionService, domain, failOpen, defaultGlobalRateLimit}`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RateLimitServiceConfig {
    pub extension_service: NamespacedName,
    pub domain: String,
    pub fail_open: bool,
    pub default_global_rate_limit: Option<u32>,
}

/// `timeouts.*`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TimeoutsConfig {
    pub request_timeout_seconds: Option<u64>,
    pub connection_idle_timeout_seconds: Option<u64>,
    pub stream_idle_timeout_seconds: Option<u64>,
    pub max_connection_duration_seconds: Option<u64>,
    pub connection_shutdown_grace_period_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: None,
            connection_idle_timeout_seconds: Some(60),
            stream_idle_timeout_seconds: Some(300),
            max_connection_duration_seconds: None,
            connection_shutdown_grace_period_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessLogFormat {
    EnvoyText,
    Json,
}

/// The closed set of JSON access-log field names this crate recognizes.
/// Each one maps to an Envoy format operator in the listener cache.
pub const ACCESS_LOG_FIELD_NAMES: &[&str] = &[
    "timestamp",
    "method",
    "path",
    "protocol",
    "response_code",
    "response_flags",
    "bytes_received",
    "bytes_sent",
    "duration",
    "upstream_host",
    "upstream_cluster",
    "authority",
    "user_agent",
    "request_id",
];

/// `accessLogFormat`, `accessLogFields`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AccessLogConfig {
    pub format: AccessLogFormat,
    pub fields: Vec<String>,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            format: AccessLogFormat::EnvoyText,
            fields: vec!["timestamp".into(), "method".into(), "path".into(), "response_code".into()],
        }
    }
}

/// `leaderElection.*`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    pub lease_namespace: String,
    pub lease_duration_seconds: u64,
    pub renew_deadline_seconds: u64,
    pub retry_period_seconds: u64,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            lease_name: "contour-rs".to_string(),
            lease_namespace: "projectcontour".to_string(),
            lease_duration_seconds: 15,
            renew_deadline_seconds: 10,
            retry_period_seconds: 2,
        }
    }
}

/// `envoy.{httpListener,httpsListener}.{address,port,accessLog}`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnvoyListenerConfig {
    pub address: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnvoyListenersConfig {
    #[validate(nested)]
    pub http_listener: EnvoyListenerConfig,
    #[validate(nested)]
    pub https_listener: EnvoyListenerConfig,
}

impl Default for EnvoyListenersConfig {
    fn default() -> Self {
        Self {
            http_listener: EnvoyListenerConfig {
                address: "0.0.0.0".to_string(),
                port: 8080,
            },
            https_listener: EnvoyListenerConfig {
                address: "0.0.0.0".to_string(),
                port: 8443,
            },
        }
    }
}

/// Logging and distributed-tracing knobs, loaded the same way as
/// [`AppConfig`] but kept separate since they govern the observability
/// stack itself rather than ingress behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logging: bool,
    pub enable_tracing: bool,
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
    pub trace_sampling_ratio: f64,
    pub enable_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            enable_tracing: true,
            otlp_endpoint: Some("http://localhost:4317".to_string()),
            service_name: "contour-rs".to_string(),
            trace_sampling_ratio: 1.0,
            enable_metrics: true,
        }
    }
}
