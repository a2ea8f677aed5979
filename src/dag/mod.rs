//! The DAG builder (section 4.B): the pure function from a snapshot of the
//! [`crate::cache::ObjectCache`] to a [`Dag`] of xDS-shaped nodes plus the
//! [`crate::domain::StatusFact`]s that fed into it. Nothing in this module
//! talks to a network or a clock; `DagBuilder::build` is deterministic in
//! its inputs, which is what makes the "identical cache contents produce a
//! byte-identical xDS snapshot" invariant in section 8 checkable at all.

mod builder;
mod nodes;

pub use builder::DagBuilder;
pub use nodes::{
    Cluster, CircuitBreaker, ClusterKey, Dag, Endpoint, EndpointSet, HeaderMatch, HeaderPolicy,
    HealthCheck, LoadBalancingPolicy, PathMatch, Route, RouteAction, RouteMatch, Secret,
    SecretKey, SecretMaterial, SecureVirtualHostExtras, TcpProxy, UpstreamProtocol, UpstreamTls,
    VirtualHost, WeightedCluster,
};
