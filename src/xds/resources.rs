//! The common envelope xDS resource builders produce, plus the type URL
//! constants identifying each discovery response's payload.

use envoy_types::pb::google::protobuf::Any;
use prost::Message;

/// One resource ready to be placed into a `DiscoveryResponse.resources` list.
///
/// `name` is the xDS resource name (cluster key, virtual host domain set,
/// listener name, ...) used for ADS resource-name subscriptions and for
/// diffing a cache's contents between snapshots. `resource` is the
/// `Any`-wrapped protobuf payload itself.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    pub fn new<M: Message>(name: impl Into<String>, type_url: &str, message: &M) -> Self {
        Self {
            name: name.into(),
            resource: Any { type_url: type_url.to_string(), value: message.encode_to_vec() },
        }
    }

    pub fn type_url(&self) -> &str {
        &self.resource.type_url
    }
}

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const CLUSTER_LOAD_ASSIGNMENT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ROUTE_CONFIGURATION_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const SECRET_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";
pub const RUNTIME_TYPE_URL: &str = "type.googleapis.com/envoy.service.runtime.v3.Runtime";

/// Maps a type URL onto the short discovery type name ADS clients send in
/// `DiscoveryRequest.type_url`; also used as the human-readable log field.
pub fn short_name(type_url: &str) -> &'static str {
    match type_url {
        CLUSTER_TYPE_URL => "CDS",
        CLUSTER_LOAD_ASSIGNMENT_TYPE_URL => "EDS",
        LISTENER_TYPE_URL => "LDS",
        ROUTE_CONFIGURATION_TYPE_URL => "RDS",
        SECRET_TYPE_URL => "SDS",
        RUNTIME_TYPE_URL => "RTDS",
        _ => "unknown",
    }
}
