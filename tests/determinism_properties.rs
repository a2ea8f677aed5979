//! Property-based checks for the two purity invariants section 8 states
//! for the DAG builder: `build(S) == build(S)` (invariant 1) and that
//! objects irrelevant to the current configuration never change the
//! result (invariant 2). These are exactly the kind of "property over
//! arbitrary cache contents" SPEC_FULL.md calls out `proptest` for, rather
//! than a fixed table of example inputs.

use proptest::prelude::*;

use contour_rs::cache::{CacheEntry, ObjectCache};
use contour_rs::config::AppConfig;
use contour_rs::dag::DagBuilder;
use contour_rs::domain::{
    HttpProxy, HttpProxyRoute, HttpProxyService, ObjectKind, ObjectRef, PathCondition, Service,
    ServicePort,
};

fn arb_segment() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,8}".prop_map(|s| s)
}

/// A small, arbitrary-ish set of HTTPProxy roots, each with a unique FQDN
/// and a single forwarding route to a same-named Service, plus a variable
/// number of wholly unrelated Services that nothing ever references.
fn arb_world() -> impl Strategy<Value = (Vec<(String, String, u16)>, Vec<String>)> {
    (
        prop::collection::vec((arb_segment(), arb_segment(), 1u16..=3), 0..6),
        prop::collection::vec(arb_segment(), 0..6),
    )
}

fn build_cache(proxies: &[(String, String, u16)], unrelated_services: &[String]) -> ObjectCache {
    let cache = ObjectCache::new(false);
    for (i, (fqdn, backend, port)) in proxies.iter().enumerate() {
        let service_name = format!("svc-{backend}-{i}");
        cache.insert(
            ObjectRef::new(ObjectKind::Service, "default", &service_name),
            CacheEntry::Service(Service {
                namespace: "default".into(),
                name: service_name.clone(),
                ports: vec![ServicePort { name: None, port: *port, target_port: *port }],
            }),
        );
        cache.insert(
            ObjectRef::new(ObjectKind::HttpProxy, "default", format!("proxy-{i}")),
            CacheEntry::HttpProxy(HttpProxy {
                namespace: "default".into(),
                name: format!("proxy-{i}"),
                fqdn: Some(format!("{fqdn}-{i}.example.com")),
                tls_secret_name: None,
                enable_fallback_certificate: false,
                includes: Vec::new(),
                routes: vec![HttpProxyRoute {
                    path: PathCondition::Prefix("/".into()),
                    headers: Vec::new(),
                    services: vec![HttpProxyService { name: service_name, port: *port, weight: 1 }],
                    prefix_rewrite: None,
                    timeout_seconds: None,
                    retry_attempts: None,
                    websocket: false,
                    mirror_services: Vec::new(),
                    permit_insecure: true,
                }],
                rate_limit_policy: None,
                cors_policy: None,
            }),
        );
    }
    for (i, name) in unrelated_services.iter().enumerate() {
        cache.insert(
            ObjectRef::new(ObjectKind::Service, "default", format!("unrelated-{name}-{i}")),
            CacheEntry::Service(Service {
                namespace: "default".into(),
                name: format!("unrelated-{name}-{i}"),
                ports: vec![ServicePort { name: None, port: 9999, target_port: 9999 }],
            }),
        );
    }
    cache
}

proptest! {
    /// Invariant 1: building twice from the same cache snapshot is
    /// byte-identical — no ordering nondeterminism leaks through.
    #[test]
    fn build_is_deterministic((proxies, unrelated) in arb_world()) {
        let cache = build_cache(&proxies, &unrelated);
        let config = AppConfig::default();

        let (first, _) = DagBuilder::new(&cache, &config).build();
        let (second, _) = DagBuilder::new(&cache, &config).build();

        prop_assert_eq!(format!("{:?}", first), format!("{:?}", second));
    }

    /// Invariant 2: adding Services that no route references never
    /// changes the built DAG.
    #[test]
    fn irrelevant_services_do_not_affect_the_dag(
        (proxies, unrelated) in arb_world(),
        extra_unrelated in prop::collection::vec(arb_segment(), 0..4),
    ) {
        let cache = build_cache(&proxies, &unrelated);
        let config = AppConfig::default();
        let (before, _) = DagBuilder::new(&cache, &config).build();

        for (i, name) in extra_unrelated.iter().enumerate() {
            cache.insert(
                ObjectRef::new(ObjectKind::Service, "default", format!("extra-{name}-{i}")),
                CacheEntry::Service(Service {
                    namespace: "default".into(),
                    name: format!("extra-{name}-{i}"),
                    ports: vec![ServicePort { name: None, port: 7777, target_port: 7777 }],
                }),
            );
        }
        let (after, _) = DagBuilder::new(&cache, &config).build();

        prop_assert_eq!(format!("{:?}", before), format!("{:?}", after));
    }
}
