//! The typed, minimal object model this crate consumes from "Kubernetes".
//!
//! These are not faithful CRD schemas: each struct carries only the fields
//! the DAG builder (`crate::dag`) actually reads, per the spec's note that
//! schema fidelity belongs to the upstream CRD/type definitions, not here.
//! `RoutingSource` is the tagged-variant seam mentioned in the design notes:
//! Ingress, HTTPProxy, and Gateway-API HTTPRoute all produce the same
//! VirtualHost shape, dispatched once per source.

mod objects;
mod routing_source;
pub mod status;

pub use objects::{
    CorsPolicy, EndpointAddress, EndpointSlice, ExtensionService, Gateway, GatewayClass,
    GatewayListener, GrpcRoute, HeaderCondition, HeaderConditionOp, HttpProxy, HttpProxyInclude,
    HttpProxyRoute, HttpProxyService, HttpRoute, Ingress, IngressRule, Namespace, ObjectKind,
    ObjectRef, PathCondition, PortSelector, RateLimitPolicy, ReferenceGrant, Secret, SecretKind,
    Service, ServicePort, TcpRoute, TlsCertificateDelegation, TlsRoute,
};
pub use routing_source::{RoutingSource, RoutingSourceKind};
pub use status::{Condition, ConditionStatus, StatusFact};

/// A generation counter. Kubernetes objects carry an opaque `resourceVersion`
/// string; this crate uses a monotonically increasing `u64` per object key
/// as a simplified stand-in (the cache's "changed?" test is value equality
/// on the object body, not generation comparison, so the choice is immaterial
/// to the invariants the spec cares about).
pub type Generation = u64;
