//! The snapshot engine (section 4.D): maintains the *current* versioned set
//! of resources for every xDS type and fans out change notifications to
//! every attached stream without ever letting a stream observe a
//! half-applied snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::xds::caches::{ClusterCache, EndpointCache, ListenerCache, ResourceCache, RouteCache, RuntimeCache, SecretCache};
use crate::xds::resources::{
    BuiltResource, CLUSTER_LOAD_ASSIGNMENT_TYPE_URL, CLUSTER_TYPE_URL, LISTENER_TYPE_URL,
    ROUTE_CONFIGURATION_TYPE_URL, RUNTIME_TYPE_URL, SECRET_TYPE_URL,
};

/// A complete, internally-consistent set of resources bound to one version.
/// Streams diff against `version` only; the resource lists themselves are
/// always the full state-of-the-world for their type.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub version: String,
    pub resources: BTreeMap<&'static str, Vec<BuiltResource>>,
}

impl Snapshot {
    pub fn resources_for(&self, type_url: &str) -> Vec<BuiltResource> {
        self.resources.get(type_url).cloned().unwrap_or_default()
    }
}

/// Owns the current snapshot and fans out new versions to every subscribed
/// xDS stream. The fixed node-hash (section 4.E) means there is exactly one
/// snapshot in flight at a time; replicas never shard by node identity.
pub struct SnapshotEngine {
    node_hash: String,
    current: Mutex<Arc<Snapshot>>,
    sender: broadcast::Sender<Arc<Snapshot>>,
}

impl SnapshotEngine {
    pub fn new(node_hash: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { node_hash: node_hash.into(), current: Mutex::new(Arc::new(Snapshot::default())), sender }
    }

    pub fn node_hash(&self) -> &str {
        &self.node_hash
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.current.lock().expect("snapshot engine lock poisoned").clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.sender.subscribe()
    }

    /// Computes the cartesian product of the six resource caches' current
    /// contents, binds it to a fresh version, and publishes it atomically:
    /// the lock is held only long enough to swap the `Arc`, never during
    /// marshaling (section 5 "Shared resources").
    pub fn publish(
        &self,
        listener: &ListenerCache,
        route: &RouteCache,
        cluster: &ClusterCache,
        endpoint: &EndpointCache,
        secret: &SecretCache,
        runtime: &RuntimeCache,
    ) -> Arc<Snapshot> {
        let mut resources = BTreeMap::new();
        resources.insert(LISTENER_TYPE_URL, listener.contents());
        resources.insert(ROUTE_CONFIGURATION_TYPE_URL, route.contents());
        resources.insert(CLUSTER_TYPE_URL, cluster.contents());
        resources.insert(CLUSTER_LOAD_ASSIGNMENT_TYPE_URL, endpoint.contents());
        resources.insert(SECRET_TYPE_URL, secret.contents());
        resources.insert(RUNTIME_TYPE_URL, runtime.contents());

        let snapshot = Arc::new(Snapshot { version: Uuid::new_v4().to_string(), resources });

        {
            let mut current = self.current.lock().expect("snapshot engine lock poisoned");
            *current = snapshot.clone();
        }

        // Fan-out is best-effort: a stream that isn't currently `select!`-ing
        // on its receiver (e.g. mid-send) will see the new version on its
        // next poll via `current()` regardless of whether this send is
        // observed.
        let _ = self.sender.send(snapshot.clone());

        crate::observability::metrics::MetricsRecorder::new().record_snapshot_publish(&snapshot.version);

        snapshot
    }
}

/// Verifies the invariants section 4.D requires of every published
/// snapshot: every cluster a route names exists, every secret a listener
/// transport socket implies exists by name prefix, and every cluster with
/// endpoints has a matching endpoint set. Used by tests and by the builder
/// as a late consistency check; a violation here indicates a DAG builder
/// bug, not a runtime condition the control plane should tolerate silently.
pub fn referentially_closed(dag: &crate::dag::Dag) -> bool {
    for cluster in dag.clusters.values() {
        if cluster.upstream_tls.as_ref().and_then(|tls| tls.ca_secret.as_ref()).is_some_and(
            |ca| !dag.secrets.contains_key(ca),
        ) {
            return false;
        }
    }

    for vh in dag.secure_virtual_hosts.values() {
        if let Some(secure) = &vh.secure {
            if secure.invalid.is_none() && !dag.secrets.contains_key(&secure.secret) {
                return false;
            }
        }
    }

    for vh in dag.insecure_virtual_hosts.values().chain(dag.secure_virtual_hosts.values()) {
        for route in &vh.routes {
            if let dag::RouteAction::Forward { clusters, mirror_clusters, .. } = &route.action {
                for weighted in clusters {
                    if !dag.clusters.contains_key(&weighted.cluster) {
                        return false;
                    }
                }
                for mirror in mirror_clusters {
                    if !dag.clusters.contains_key(mirror) {
                        return false;
                    }
                }
            }
        }
    }

    true
}

use crate::dag;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::dag::Dag;

    fn fresh_caches() -> (ListenerCache, RouteCache, ClusterCache, EndpointCache, SecretCache, RuntimeCache) {
        (
            ListenerCache::new(AppConfig::default()),
            RouteCache::default(),
            ClusterCache::default(),
            EndpointCache::default(),
            SecretCache::default(),
            RuntimeCache::new(AppConfig::default()),
        )
    }

    #[test]
    fn publish_bumps_version_on_every_call() {
        let engine = SnapshotEngine::new("contour");
        let (listener, route, cluster, endpoint, secret, runtime) = fresh_caches();
        let dag = Dag::default();
        for cache in [&listener as &dyn ResourceCache] {
            cache.on_change(&dag);
        }
        route.on_change(&dag);
        cluster.on_change(&dag);
        endpoint.on_change(&dag);
        secret.on_change(&dag);
        runtime.on_change(&dag);

        let first = engine.publish(&listener, &route, &cluster, &endpoint, &secret, &runtime);
        let second = engine.publish(&listener, &route, &cluster, &endpoint, &secret, &runtime);
        assert_ne!(first.version, second.version);
    }

    #[test]
    fn empty_dag_is_referentially_closed() {
        assert!(referentially_closed(&Dag::default()));
    }

    #[test]
    fn node_hash_is_fixed() {
        let engine = SnapshotEngine::new("contour");
        assert_eq!(engine.node_hash(), "contour");
    }
}
