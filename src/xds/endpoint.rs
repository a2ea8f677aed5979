//! Translates [`crate::dag::EndpointSet`] nodes into Envoy
//! `ClusterLoadAssignment` resources (EDS).

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressKind, health_status::HealthStatus, socket_address::PortSpecifier,
    Address, SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint as EnvoyEndpoint, LbEndpoint,
    LocalityLbEndpoints,
};

use crate::dag;

/// Builds a `ClusterLoadAssignment` for one cluster's endpoint set. Only
/// ready endpoints are included unless `cluster.include_unready_endpoints`
/// opts in, per section 4.C "Endpoint cache": "only ready endpoints are
/// included unless the cluster opts into including unready ones." When
/// included, unready endpoints carry `HEALTH_STATUS::UNHEALTHY` rather than
/// `HEALTHY` so Envoy's panic threshold still sees the full membership.
pub fn build_cluster_load_assignment(
    cluster: &dag::Cluster,
    endpoints: &dag::EndpointSet,
) -> ClusterLoadAssignment {
    let capacity = endpoints.ready.len()
        + if cluster.include_unready_endpoints { endpoints.unready.len() } else { 0 };
    let mut lb_endpoints: Vec<LbEndpoint> = Vec::with_capacity(capacity);

    for endpoint in &endpoints.ready {
        lb_endpoints.push(lb_endpoint(endpoint, HealthStatus::Healthy));
    }
    if cluster.include_unready_endpoints {
        for endpoint in &endpoints.unready {
            lb_endpoints.push(lb_endpoint(endpoint, HealthStatus::Unhealthy));
        }
    }

    ClusterLoadAssignment {
        cluster_name: endpoints.cluster.clone(),
        endpoints: vec![LocalityLbEndpoints {
            locality: None,
            lb_endpoints,
            priority: 0,
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn lb_endpoint(endpoint: &dag::Endpoint, health_status: HealthStatus) -> LbEndpoint {
    LbEndpoint {
        health_status: health_status as i32,
        host_identifier: Some(HostIdentifier::Endpoint(EnvoyEndpoint {
            address: Some(Address {
                address: Some(AddressKind::SocketAddress(SocketAddress {
                    address: endpoint.ip.clone(),
                    port_specifier: Some(PortSpecifier::PortValue(endpoint.port as u32)),
                    ..Default::default()
                })),
            }),
            ..Default::default()
        })),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObjectKind, ObjectRef};

    fn test_cluster(include_unready_endpoints: bool) -> dag::Cluster {
        dag::Cluster {
            key: "default/echo/80".to_string(),
            service: ObjectRef::new(ObjectKind::Service, "default", "echo"),
            port: 80,
            load_balancing: dag::LoadBalancingPolicy::RoundRobin,
            protocol: dag::UpstreamProtocol::Http,
            upstream_tls: None,
            health_check: None,
            circuit_breaker: None,
            include_unready_endpoints,
        }
    }

    #[test]
    fn ready_endpoints_are_marked_healthy() {
        let set = dag::EndpointSet {
            cluster: "default/echo/80".to_string(),
            ready: vec![dag::Endpoint { ip: "10.0.0.1".into(), port: 8080 }],
            unready: vec![],
        };

        let cla = build_cluster_load_assignment(&test_cluster(false), &set);
        assert_eq!(cla.cluster_name, "default/echo/80");
        assert_eq!(cla.endpoints.len(), 1);
        assert_eq!(cla.endpoints[0].lb_endpoints.len(), 1);
        assert_eq!(cla.endpoints[0].lb_endpoints[0].health_status, HealthStatus::Healthy as i32);
    }

    #[test]
    fn unready_endpoints_are_omitted_by_default() {
        let set = dag::EndpointSet {
            cluster: "default/echo/80".to_string(),
            ready: vec![],
            unready: vec![dag::Endpoint { ip: "10.0.0.2".into(), port: 8080 }],
        };

        let cla = build_cluster_load_assignment(&test_cluster(false), &set);
        assert!(cla.endpoints[0].lb_endpoints.is_empty());
    }

    #[test]
    fn unready_endpoints_are_included_as_unhealthy_when_opted_in() {
        let set = dag::EndpointSet {
            cluster: "default/echo/80".to_string(),
            ready: vec![],
            unready: vec![dag::Endpoint { ip: "10.0.0.2".into(), port: 8080 }],
        };

        let cla = build_cluster_load_assignment(&test_cluster(true), &set);
        assert_eq!(cla.endpoints[0].lb_endpoints.len(), 1);
        assert_eq!(cla.endpoints[0].lb_endpoints[0].health_status, HealthStatus::Unhealthy as i32);
    }

    #[test]
    fn empty_set_still_produces_one_locality() {
        let set = dag::EndpointSet { cluster: "default/echo/80".to_string(), ready: vec![], unready: vec![] };
        let cla = build_cluster_load_assignment(&test_cluster(false), &set);
        assert_eq!(cla.endpoints.len(), 1);
        assert!(cla.endpoints[0].lb_endpoints.is_empty());
    }
}
