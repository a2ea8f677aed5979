//! End-to-end scenarios for the object cache -> DAG builder -> resource
//! cache pipeline (section 8, "Concrete end-to-end scenarios"). Each test
//! drives the same public surface the dag-builder workgroup task uses:
//! insert objects into an `ObjectCache`, run one `DagBuilder::build`, then
//! feed the result through the six resource caches and assert on the
//! `BuiltResource`s they emit.

use contour_rs::cache::{CacheEntry, ObjectCache};
use contour_rs::config::AppConfig;
use contour_rs::dag::{DagBuilder, PathMatch};
use contour_rs::domain::{
    ConditionStatus, EndpointAddress, EndpointSlice, HttpProxy, HttpProxyInclude, HttpProxyRoute,
    HttpProxyService, ObjectKind, ObjectRef, PathCondition, Secret, SecretKind, Service, ServicePort,
    TlsCertificateDelegation,
};
use contour_rs::snapshot::referentially_closed;
use contour_rs::xds::caches::{
    ClusterCache, EndpointCache, ListenerCache, ResourceCache, RouteCache, RuntimeCache, SecretCache,
};

fn service(namespace: &str, name: &str, port: u16) -> Service {
    Service { namespace: namespace.into(), name: name.into(), ports: vec![ServicePort { name: None, port, target_port: port }] }
}

fn basic_route(backend: &str, port: u16) -> HttpProxyRoute {
    HttpProxyRoute {
        path: PathCondition::Prefix("/".into()),
        headers: Vec::new(),
        services: vec![HttpProxyService { name: backend.into(), port, weight: 1 }],
        prefix_rewrite: None,
        timeout_seconds: None,
        retry_attempts: None,
        websocket: false,
        mirror_services: Vec::new(),
        permit_insecure: true,
    }
}

fn root_proxy(namespace: &str, name: &str, fqdn: &str) -> HttpProxy {
    HttpProxy {
        namespace: namespace.into(),
        name: name.into(),
        fqdn: Some(fqdn.into()),
        tls_secret_name: None,
        enable_fallback_certificate: false,
        includes: Vec::new(),
        routes: Vec::new(),
        rate_limit_policy: None,
        cors_policy: None,
    }
}

/// Runs a full build and applies it to a fresh set of the six resource
/// caches, mirroring what `main.rs`'s dag-builder task does every cycle.
struct BuiltCaches {
    listener: ListenerCache,
    route: RouteCache,
    cluster: ClusterCache,
    endpoint: EndpointCache,
    secret: SecretCache,
    runtime: RuntimeCache,
}

fn publish(cache: &ObjectCache, config: &AppConfig) -> BuiltCaches {
    let (dag, statuses) = DagBuilder::new(cache, config).build();
    assert!(referentially_closed(&dag), "build produced a non-referentially-closed DAG");

    let caches = BuiltCaches {
        listener: ListenerCache::new(config.clone()),
        route: RouteCache::default(),
        cluster: ClusterCache::default(),
        endpoint: EndpointCache::default(),
        secret: SecretCache::default(),
        runtime: RuntimeCache::new(config.clone()),
    };
    for c in [
        &caches.listener as &dyn ResourceCache,
        &caches.route,
        &caches.cluster,
        &caches.endpoint,
        &caches.secret,
        &caches.runtime,
    ] {
        c.on_change(&dag);
    }
    let _ = statuses;
    caches
}

#[test]
fn scenario_1_basic_route_produces_listener_route_cluster_and_two_endpoints() {
    let cache = ObjectCache::new(false);
    cache.insert(ObjectRef::new(ObjectKind::Service, "default", "echo"), CacheEntry::Service(service("default", "echo", 80)));
    cache.insert(
        ObjectRef::new(ObjectKind::EndpointSlice, "default", "echo-abcde"),
        CacheEntry::EndpointSlice(EndpointSlice {
            namespace: "default".into(),
            service_name: "echo".into(),
            port_name: None,
            addresses: vec![
                EndpointAddress { ip: "10.0.0.1".into(), port: 8080, ready: true },
                EndpointAddress { ip: "10.0.0.2".into(), port: 8080, ready: true },
            ],
        }),
    );
    let mut proxy = root_proxy("default", "basic", "basic.example.com");
    proxy.routes = vec![basic_route("echo", 80)];
    cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "default", "basic"), CacheEntry::HttpProxy(proxy));

    let config = AppConfig::default();
    let (dag, statuses) = DagBuilder::new(&cache, &config).build();

    let vhost = dag.insecure_virtual_hosts.get("basic.example.com").expect("vhost present");
    assert_eq!(vhost.routes.len(), 1);
    assert_eq!(dag.clusters.len(), 1);
    let cluster_key = dag.clusters.keys().next().unwrap().clone();
    assert_eq!(cluster_key, "default/echo/80");
    let endpoints = dag.endpoints.get(&cluster_key).expect("endpoint set present");
    assert_eq!(endpoints.ready.len(), 2);

    let fact = statuses.iter().find(|s| s.object.name == "basic").expect("status fact for proxy");
    assert!(fact.conditions.iter().any(|c| c.status == ConditionStatus::True));

    let built = publish(&cache, &config);
    assert_eq!(built.cluster.contents().len(), 1);
    assert_eq!(built.endpoint.contents().len(), 1);
    assert!(!built.listener.contents().is_empty());
    assert!(!built.route.contents().is_empty());
}

#[test]
fn scenario_2_inclusion_then_orphan_on_parent_deletion() {
    let cache = ObjectCache::new(false);
    cache.insert(ObjectRef::new(ObjectKind::Service, "default", "svc-v1"), CacheEntry::Service(service("default", "svc-v1", 80)));

    let mut child = root_proxy("default", "child", "unused");
    child.fqdn = None;
    child.routes = vec![{
        let mut r = basic_route("svc-v1", 80);
        r.path = PathCondition::Prefix("/v1".into());
        r
    }];
    cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "default", "child"), CacheEntry::HttpProxy(child));

    let mut root = root_proxy("default", "root", "www.example.com");
    root.includes = vec![HttpProxyInclude { name: "child".into(), namespace: Some("default".into()), condition_prefix: Some("/api".into()) }];
    cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "default", "root"), CacheEntry::HttpProxy(root));

    let config = AppConfig::default();
    let (dag, statuses) = DagBuilder::new(&cache, &config).build();

    let vhost = dag.insecure_virtual_hosts.get("www.example.com").expect("merged vhost present");
    assert_eq!(vhost.routes.len(), 1);
    assert!(matches!(&vhost.routes[0].r#match.path, PathMatch::Prefix(p) if p == "/api/v1"));

    let child_fact = statuses.iter().find(|s| s.object.name == "child").expect("child status present");
    assert!(child_fact.conditions.iter().any(|c| c.status == ConditionStatus::True));

    cache.remove(&ObjectRef::new(ObjectKind::HttpProxy, "default", "root"));
    let (_, statuses_after) = DagBuilder::new(&cache, &config).build();
    let orphaned = statuses_after.iter().find(|s| s.object.name == "child").expect("child status present");
    assert!(orphaned.conditions.iter().any(|c| c.reason == "Orphaned"));
}

#[test]
fn scenario_4_missing_backend_synthesizes_503_and_excludes_cluster() {
    let cache = ObjectCache::new(false);
    let mut proxy = root_proxy("default", "missing-backend", "missing.example.com");
    proxy.routes = vec![basic_route("missing", 80)];
    cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "default", "missing-backend"), CacheEntry::HttpProxy(proxy));

    let config = AppConfig::default();
    let (dag, statuses) = DagBuilder::new(&cache, &config).build();

    let vhost = dag.insecure_virtual_hosts.get("missing.example.com").expect("vhost present");
    assert_eq!(vhost.routes.len(), 1, "route stays in the DAG so / fallthrough is preserved");
    assert!(matches!(vhost.routes[0].action, contour_rs::dag::RouteAction::DirectResponse { status: 503 }));
    assert!(!dag.clusters.contains_key("default/missing/80"));

    let fact = statuses.iter().find(|s| s.object.name == "missing-backend").expect("status fact present");
    assert!(fact.conditions.iter().any(|c| c.reason == "ServiceUnresolved" && c.status == ConditionStatus::False));

    let built = publish(&cache, &config);
    assert!(built.cluster.contents().is_empty(), "unresolved service must not appear in the cluster cache");
    assert!(!built.route.contents().is_empty(), "the 503 route is still published");
}

#[test]
fn scenario_5_tls_delegation_required_for_cross_namespace_secret() {
    let cache = ObjectCache::new(false);
    cache.insert(ObjectRef::new(ObjectKind::Service, "app", "web"), CacheEntry::Service(service("app", "web", 80)));
    cache.insert(
        ObjectRef::new(ObjectKind::Secret, "infra", "wildcard"),
        CacheEntry::Secret(Secret {
            namespace: "infra".into(),
            name: "wildcard".into(),
            kind: SecretKind::TlsCertificate,
            certificate_chain: Some("chain-pem".into()),
            private_key: Some("key-pem".into()),
            data: Default::default(),
        }),
    );

    let mut proxy = root_proxy("app", "secure", "secure.app.example.com");
    proxy.tls_secret_name = Some("infra/wildcard".into());
    proxy.routes = vec![basic_route("web", 80)];
    cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "app", "secure"), CacheEntry::HttpProxy(proxy));

    let config = AppConfig::default();

    // Without delegation: the vhost is marked invalid.
    let (dag_no_delegation, statuses) = DagBuilder::new(&cache, &config).build();
    let vhost = dag_no_delegation.secure_virtual_hosts.get("secure.app.example.com").expect("secure vhost present");
    assert!(vhost.secure.as_ref().unwrap().invalid.is_some());
    assert!(statuses.iter().any(|s| s.conditions.iter().any(|c| c.reason == "TLSSecretNotPermitted")));

    // With delegation: the secret resolves and the vhost is valid.
    cache.insert(
        ObjectRef::new(ObjectKind::TlsCertificateDelegation, "infra", "wildcard-delegation"),
        CacheEntry::TlsCertificateDelegation(TlsCertificateDelegation {
            namespace: "infra".into(),
            name: "wildcard-delegation".into(),
            delegations: vec![("wildcard".into(), vec!["app".into()])],
        }),
    );
    let (dag, _) = DagBuilder::new(&cache, &config).build();
    let vhost = dag.secure_virtual_hosts.get("secure.app.example.com").expect("secure vhost present");
    assert!(vhost.secure.as_ref().unwrap().invalid.is_none());
    assert_eq!(dag.secrets.len(), 1);

    let built = publish(&cache, &config);
    assert_eq!(built.secret.contents().len(), 1);
}

#[test]
fn irrelevant_object_change_does_not_change_the_published_snapshot() {
    let cache = ObjectCache::new(false);
    cache.insert(ObjectRef::new(ObjectKind::Service, "default", "echo"), CacheEntry::Service(service("default", "echo", 80)));
    let mut proxy = root_proxy("default", "basic", "basic.example.com");
    proxy.routes = vec![basic_route("echo", 80)];
    cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "default", "basic"), CacheEntry::HttpProxy(proxy));

    let config = AppConfig::default();
    let (first, _) = DagBuilder::new(&cache, &config).build();

    // A Service referenced by no route: irrelevant to this configuration.
    cache.insert(
        ObjectRef::new(ObjectKind::Service, "default", "unrelated"),
        CacheEntry::Service(service("default", "unrelated", 9090)),
    );
    let (second, _) = DagBuilder::new(&cache, &config).build();

    assert_eq!(format!("{first:?}"), format!("{second:?}"));
}

#[test]
fn duplicate_fqdn_with_identical_spec_keeps_exactly_one_winner() {
    let cache = ObjectCache::new(false);
    cache.insert(ObjectRef::new(ObjectKind::Service, "default", "a"), CacheEntry::Service(service("default", "a", 80)));

    let mut proxy_a = root_proxy("default", "a", "dup.example.com");
    proxy_a.routes = vec![basic_route("a", 80)];
    let proxy_b = {
        let mut p = proxy_a.clone();
        p.name = "b".into();
        p.namespace = "other".into();
        p
    };
    cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "default", "a"), CacheEntry::HttpProxy(proxy_a));
    cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "other", "b"), CacheEntry::HttpProxy(proxy_b));

    let config = AppConfig::default();
    let (dag, statuses) = DagBuilder::new(&cache, &config).build();

    let vhost = dag.insecure_virtual_hosts.get("dup.example.com").unwrap();
    assert_eq!(vhost.sources.len(), 1, "exactly one winner by (namespace,name) order");
    assert!(statuses.iter().any(|s| s.conditions.iter().any(|c| c.reason == "DuplicateHostname")));
}

#[test]
fn scenario_3_duplicate_fqdn_with_differing_specs_rejects_both() {
    let cache = ObjectCache::new(false);
    cache.insert(ObjectRef::new(ObjectKind::Service, "ns-a", "a"), CacheEntry::Service(service("ns-a", "a", 80)));
    cache.insert(ObjectRef::new(ObjectKind::Service, "ns-b", "b"), CacheEntry::Service(service("ns-b", "b", 80)));

    let mut proxy_a = root_proxy("ns-a", "a", "dup.example.com");
    proxy_a.routes = vec![basic_route("a", 80)];
    let mut proxy_b = root_proxy("ns-b", "b", "dup.example.com");
    proxy_b.routes = vec![basic_route("b", 80)];
    cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "ns-a", "a"), CacheEntry::HttpProxy(proxy_a));
    cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "ns-b", "b"), CacheEntry::HttpProxy(proxy_b));

    let config = AppConfig::default();
    let (dag, statuses) = DagBuilder::new(&cache, &config).build();

    assert!(
        dag.insecure_virtual_hosts.get("dup.example.com").is_none(),
        "dup.example.com must be absent from the DAG, and therefore every emitted route configuration"
    );
    let rejections = statuses
        .iter()
        .filter(|s| s.conditions.iter().any(|c| c.reason == "DuplicateHostname"))
        .count();
    assert_eq!(rejections, 2, "both conflicting HTTPProxies are rejected");
}
