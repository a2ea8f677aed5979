//! Translates [`crate::dag::Cluster`] nodes into Envoy `Cluster` resources
//! (CDS). Endpoint membership is always delivered out-of-band via EDS/ADS;
//! this builder never inlines a `load_assignment`.

use envoy_types::pb::envoy::config::cluster::v3::{
    cluster::{ClusterDiscoveryType, DiscoveryType, EdsClusterConfig, LbPolicy},
    Cluster as EnvoyCluster, CircuitBreakers, OutlierDetection,
};
use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, AggregatedConfigSource, ConfigSource,
};
use envoy_types::pb::envoy::config::core::v3::health_check::{
    http_health_check::CodecClientType, HttpHealthCheck,
};
use envoy_types::pb::envoy::config::core::v3::HealthCheck as EnvoyHealthCheck;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context, CertificateValidationContext, CommonTlsContext, SdsSecretConfig,
    UpstreamTlsContext,
};
use envoy_types::pb::envoy::config::cluster::v3::circuit_breakers::Thresholds;
use envoy_types::pb::envoy::config::core::v3::{transport_socket::ConfigType as TransportSocketConfigType, DataSource, RoutingPriority, TransportSocket};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, Duration, UInt32Value};
use prost::Message;

use crate::dag;

const UPSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";

/// Builds an EDS-backed Envoy `Cluster` resource from a DAG cluster node.
/// Every cluster this control plane emits discovers its endpoints via ADS,
/// named for the cluster's own `cluster_key` (section 4.C "Cluster cache").
pub fn build_cluster(cluster: &dag::Cluster) -> EnvoyCluster {
    let ads_config_source = ConfigSource {
        config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
        resource_api_version: 0,
        ..Default::default()
    };

    EnvoyCluster {
        name: cluster.key.clone(),
        connect_timeout: Some(Duration { seconds: 5, nanos: 0 }),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32)),
        eds_cluster_config: Some(EdsClusterConfig {
            eds_config: Some(ads_config_source),
            service_name: String::new(),
        }),
        lb_policy: load_balancing_policy(cluster.load_balancing) as i32,
        transport_socket: upstream_transport_socket(cluster),
        health_checks: cluster.health_check.as_ref().map(build_health_check).into_iter().collect(),
        circuit_breakers: cluster.circuit_breaker.as_ref().map(build_circuit_breakers),
        outlier_detection: cluster.circuit_breaker.as_ref().map(|_| OutlierDetection::default()),
        ..Default::default()
    }
}

fn load_balancing_policy(policy: dag::LoadBalancingPolicy) -> LbPolicy {
    match policy {
        dag::LoadBalancingPolicy::RoundRobin => LbPolicy::RoundRobin,
        dag::LoadBalancingPolicy::WeightedLeastRequest => LbPolicy::LeastRequest,
        dag::LoadBalancingPolicy::Random => LbPolicy::Random,
        // Envoy has no native cookie/request-hash LbPolicy variant outside
        // the ring-hash family; map both onto Maglev, which this control
        // plane treats as "consistent hash, exact algorithm unspecified".
        dag::LoadBalancingPolicy::RequestHash => LbPolicy::Maglev,
        dag::LoadBalancingPolicy::CookieHash => LbPolicy::Maglev,
    }
}

fn upstream_transport_socket(cluster: &dag::Cluster) -> Option<TransportSocket> {
    let tls = match &cluster.upstream_tls {
        Some(tls) => tls,
        None => return None,
    };

    let validation_context_type = tls.ca_secret.as_ref().map(|_| {
        common_tls_context::ValidationContextType::ValidationContext(CertificateValidationContext {
            trusted_ca: Some(DataSource::default()),
            match_subject_alt_names: tls
                .subject_names
                .iter()
                .map(|name| envoy_types::pb::envoy::r#type::matcher::v3::StringMatcher {
                    match_pattern: Some(
                        envoy_types::pb::envoy::r#type::matcher::v3::string_matcher::MatchPattern::Exact(
                            name.clone(),
                        ),
                    ),
                    ignore_case: false,
                })
                .collect(),
            ..Default::default()
        })
    });

    let tls_certificate_sds_secret_configs = tls
        .client_cert_secret
        .as_ref()
        .map(|secret_name| vec![sds_secret_config(secret_name)])
        .unwrap_or_default();

    let common = CommonTlsContext {
        tls_certificate_sds_secret_configs,
        validation_context_type,
        ..Default::default()
    };

    let upstream = UpstreamTlsContext {
        common_tls_context: Some(common),
        sni: tls.sni.clone().unwrap_or_default(),
        ..Default::default()
    };

    Some(TransportSocket {
        name: "envoy.transport_sockets.tls".to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(EnvoyAny {
            type_url: UPSTREAM_TLS_CONTEXT_TYPE_URL.to_string(),
            value: upstream.encode_to_vec(),
        })),
    })
}

/// References a secret cache entry by name over ADS, matching how the
/// listener cache's downstream transport sockets resolve certificates
/// (section 4.C "Secret cache").
fn sds_secret_config(name: &str) -> SdsSecretConfig {
    SdsSecretConfig {
        name: name.to_string(),
        sds_config: Some(ConfigSource {
            config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
            ..Default::default()
        }),
    }
}

fn build_health_check(hc: &dag::HealthCheck) -> EnvoyHealthCheck {
    EnvoyHealthCheck {
        timeout: Some(Duration { seconds: hc.timeout_seconds as i64, nanos: 0 }),
        interval: Some(Duration { seconds: hc.interval_seconds as i64, nanos: 0 }),
        healthy_threshold: Some(UInt32Value { value: hc.healthy_threshold }),
        unhealthy_threshold: Some(UInt32Value { value: hc.unhealthy_threshold }),
        unhealthy_edge_interval: None,
        healthy_edge_interval: None,
        event_log_path: String::new(),
        no_traffic_interval: None,
        always_log_health_check_failures: false,
        health_checker: Some(
            envoy_types::pb::envoy::config::core::v3::health_check::HealthChecker::HttpHealthCheck(
                HttpHealthCheck {
                    path: hc.path.clone(),
                    codec_client_type: CodecClientType::Http1 as i32,
                    expected_statuses: vec![],
                    ..Default::default()
                },
            ),
        ),
        ..Default::default()
    }
}

fn build_circuit_breakers(cb: &dag::CircuitBreaker) -> CircuitBreakers {
    CircuitBreakers {
        thresholds: vec![Thresholds {
            priority: RoutingPriority::Default as i32,
            max_connections: Some(UInt32Value { value: cb.max_connections }),
            max_pending_requests: Some(UInt32Value { value: cb.max_pending_requests }),
            max_requests: Some(UInt32Value { value: cb.max_requests }),
            max_retries: Some(UInt32Value { value: cb.max_retries }),
            ..Default::default()
        }],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObjectKind, ObjectRef};

    fn cluster(lb: dag::LoadBalancingPolicy) -> dag::Cluster {
        dag::Cluster {
            key: "default/echo/80".to_string(),
            service: ObjectRef::new(ObjectKind::Service, "default", "echo"),
            port: 80,
            load_balancing: lb,
            protocol: dag::UpstreamProtocol::Http,
            upstream_tls: None,
            health_check: None,
            circuit_breaker: None,
            include_unready_endpoints: false,
        }
    }

    #[test]
    fn cluster_always_discovers_via_eds() {
        let built = build_cluster(&cluster(dag::LoadBalancingPolicy::RoundRobin));
        assert_eq!(built.name, "default/echo/80");
        assert!(built.load_assignment.is_none());
        match built.cluster_discovery_type {
            Some(ClusterDiscoveryType::Type(t)) => assert_eq!(t, DiscoveryType::Eds as i32),
            other => panic!("expected EDS discovery type, got {:?}", other),
        }
    }

    #[test]
    fn round_robin_maps_to_envoy_round_robin() {
        let built = build_cluster(&cluster(dag::LoadBalancingPolicy::RoundRobin));
        assert_eq!(built.lb_policy, LbPolicy::RoundRobin as i32);
    }

    #[test]
    fn no_upstream_tls_means_no_transport_socket() {
        let built = build_cluster(&cluster(dag::LoadBalancingPolicy::Random));
        assert!(built.transport_socket.is_none());
    }

    #[test]
    fn client_cert_secret_is_referenced_via_sds_not_inlined() {
        let mut c = cluster(dag::LoadBalancingPolicy::RoundRobin);
        c.upstream_tls = Some(dag::UpstreamTls {
            ca_secret: Some("infra/ca/abc123".to_string()),
            sni: Some("upstream.example.com".to_string()),
            subject_names: vec!["upstream.example.com".to_string()],
            client_cert_secret: Some("infra/client/def456".to_string()),
        });
        let built = build_cluster(&c);
        let socket = built.transport_socket.expect("transport socket present");
        let config_type = socket.config_type.expect("typed config present");
        let TransportSocketConfigType::TypedConfig(any) = config_type;
        let upstream = UpstreamTlsContext::decode(any.value.as_slice()).expect("valid UpstreamTlsContext");
        let common = upstream.common_tls_context.expect("common tls context present");
        assert_eq!(common.tls_certificate_sds_secret_configs.len(), 1);
        assert_eq!(common.tls_certificate_sds_secret_configs[0].name, "infra/client/def456");
    }
}
