//! The six per-type resource caches (section 4.C). Each observes DAG
//! rebuilds through `on_change` and serves its current contents through
//! `contents`, which always returns a resource-name-sorted, deduplicated
//! list so that snapshot diffs between versions are stable.

use std::sync::RwLock;

use crate::dag::Dag;
use crate::xds::resources::BuiltResource;
use crate::xds::{cluster, endpoint, listener, route, runtime, secret};

/// Common contract every xDS resource cache implements.
pub trait ResourceCache: Send + Sync {
    fn on_change(&self, dag: &Dag);
    fn contents(&self) -> Vec<BuiltResource>;
}

fn sorted_deduped(mut resources: Vec<BuiltResource>) -> Vec<BuiltResource> {
    resources.sort_by(|a, b| a.name.cmp(&b.name));
    resources.dedup_by(|a, b| a.name == b.name);
    resources
}

/// Emits Cluster resources: one per (Service, port, upstream-TLS-profile)
/// triple, taken verbatim from `Dag::clusters`.
#[derive(Default)]
pub struct ClusterCache {
    resources: RwLock<Vec<BuiltResource>>,
}

impl ResourceCache for ClusterCache {
    fn on_change(&self, dag: &Dag) {
        let built = dag
            .clusters
            .values()
            .map(|c| {
                let envoy_cluster = cluster::build_cluster(c);
                BuiltResource::new(c.key.clone(), crate::xds::resources::CLUSTER_TYPE_URL, &envoy_cluster)
            })
            .collect();
        *self.resources.write().expect("cluster cache lock poisoned") = sorted_deduped(built);
    }

    fn contents(&self) -> Vec<BuiltResource> {
        self.resources.read().expect("cluster cache lock poisoned").clone()
    }
}

/// Emits ClusterLoadAssignment resources from `Dag::endpoints`.
#[derive(Default)]
pub struct EndpointCache {
    resources: RwLock<Vec<BuiltResource>>,
}

impl ResourceCache for EndpointCache {
    fn on_change(&self, dag: &Dag) {
        let built = dag
            .endpoints
            .values()
            .filter_map(|e| {
                let cluster = dag.clusters.get(&e.cluster)?;
                let cla = endpoint::build_cluster_load_assignment(cluster, e);
                Some(BuiltResource::new(
                    e.cluster.clone(),
                    crate::xds::resources::CLUSTER_LOAD_ASSIGNMENT_TYPE_URL,
                    &cla,
                ))
            })
            .collect();
        *self.resources.write().expect("endpoint cache lock poisoned") = sorted_deduped(built);
    }

    fn contents(&self) -> Vec<BuiltResource> {
        self.resources.read().expect("endpoint cache lock poisoned").clone()
    }
}

/// Emits the HTTP/HTTPS/TLS-passthrough listeners. Requires a config
/// snapshot at construction time since listener bind addresses, timeouts,
/// and access-log shape come from `AppConfig`, not the DAG.
pub struct ListenerCache {
    config: crate::config::AppConfig,
    resources: RwLock<Vec<BuiltResource>>,
}

impl ListenerCache {
    pub fn new(config: crate::config::AppConfig) -> Self {
        Self { config, resources: RwLock::new(Vec::new()) }
    }
}

impl ResourceCache for ListenerCache {
    fn on_change(&self, dag: &Dag) {
        let built = listener::build_listeners(dag, &self.config)
            .into_iter()
            .map(|l| {
                BuiltResource::new(l.name.clone(), crate::xds::resources::LISTENER_TYPE_URL, &l)
            })
            .collect();
        *self.resources.write().expect("listener cache lock poisoned") = sorted_deduped(built);
    }

    fn contents(&self) -> Vec<BuiltResource> {
        self.resources.read().expect("listener cache lock poisoned").clone()
    }
}

/// Emits one RouteConfiguration for the insecure listener and one for the
/// secure listener.
#[derive(Default)]
pub struct RouteCache {
    resources: RwLock<Vec<BuiltResource>>,
}

impl ResourceCache for RouteCache {
    fn on_change(&self, dag: &Dag) {
        let mut built = Vec::new();

        if let Ok(route_config) = route::build_route_configuration(
            listener::INSECURE_ROUTE_CONFIG_NAME,
            dag.insecure_virtual_hosts.values(),
        ) {
            built.push(BuiltResource::new(
                listener::INSECURE_ROUTE_CONFIG_NAME,
                crate::xds::resources::ROUTE_CONFIGURATION_TYPE_URL,
                &route_config,
            ));
        }

        if let Ok(route_config) = route::build_route_configuration(
            listener::SECURE_ROUTE_CONFIG_NAME,
            dag.secure_virtual_hosts.values(),
        ) {
            built.push(BuiltResource::new(
                listener::SECURE_ROUTE_CONFIG_NAME,
                crate::xds::resources::ROUTE_CONFIGURATION_TYPE_URL,
                &route_config,
            ));
        }

        *self.resources.write().expect("route cache lock poisoned") = sorted_deduped(built);
    }

    fn contents(&self) -> Vec<BuiltResource> {
        self.resources.read().expect("route cache lock poisoned").clone()
    }
}

/// Emits SDS secrets for every certificate/CA bundle referenced anywhere in
/// the DAG.
#[derive(Default)]
pub struct SecretCache {
    resources: RwLock<Vec<BuiltResource>>,
}

impl ResourceCache for SecretCache {
    fn on_change(&self, dag: &Dag) {
        let built = secret::build_secrets(dag.secrets.values());
        *self.resources.write().expect("secret cache lock poisoned") = sorted_deduped(built);
    }

    fn contents(&self) -> Vec<BuiltResource> {
        self.resources.read().expect("secret cache lock poisoned").clone()
    }
}

/// Emits the single Runtime resource. Its contents depend only on
/// configuration, not the DAG, but it still participates in `on_change` so
/// it is refreshed on the same cadence as every other cache and the
/// snapshot engine can treat all six caches uniformly.
pub struct RuntimeCache {
    config: crate::config::AppConfig,
    resources: RwLock<Vec<BuiltResource>>,
}

impl RuntimeCache {
    pub fn new(config: crate::config::AppConfig) -> Self {
        Self { config, resources: RwLock::new(Vec::new()) }
    }
}

impl ResourceCache for RuntimeCache {
    fn on_change(&self, _dag: &Dag) {
        let built = vec![runtime::build_runtime(&self.config)];
        *self.resources.write().expect("runtime cache lock poisoned") = sorted_deduped(built);
    }

    fn contents(&self) -> Vec<BuiltResource> {
        self.resources.read().expect("runtime cache lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::dag::Dag;

    #[test]
    fn empty_dag_yields_empty_cluster_cache() {
        let cache = ClusterCache::default();
        cache.on_change(&Dag::default());
        assert!(cache.contents().is_empty());
    }

    #[test]
    fn runtime_cache_always_has_one_entry() {
        let cache = RuntimeCache::new(AppConfig::default());
        cache.on_change(&Dag::default());
        assert_eq!(cache.contents().len(), 1);
    }

    #[test]
    fn listener_cache_emits_http_listener_for_empty_dag() {
        let cache = ListenerCache::new(AppConfig::default());
        cache.on_change(&Dag::default());
        assert_eq!(cache.contents().len(), 1);
    }

    #[test]
    fn route_cache_emits_both_route_configurations_even_when_empty() {
        let cache = RouteCache::default();
        cache.on_change(&Dag::default());
        assert_eq!(cache.contents().len(), 2);
    }
}
