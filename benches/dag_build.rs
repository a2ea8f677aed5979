//! Benchmarks the DAG build pass (section 4.B) at a few cache sizes, since
//! the determinism invariant in section 8 only holds weight if a build
//! stays cheap enough to run on every coalesced cache change.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use contour_rs::cache::{CacheEntry, ObjectCache};
use contour_rs::config::AppConfig;
use contour_rs::dag::DagBuilder;
use contour_rs::domain::{
    HttpProxy, HttpProxyRoute, HttpProxyService, ObjectKind, ObjectRef, PathCondition, Service, ServicePort,
};

fn populated_cache(proxy_count: usize) -> ObjectCache {
    let cache = ObjectCache::new(false);
    for i in 0..proxy_count {
        let name = format!("svc-{i}");
        cache.insert(
            ObjectRef::new(ObjectKind::Service, "default", &name),
            CacheEntry::Service(Service {
                namespace: "default".into(),
                name: name.clone(),
                ports: vec![ServicePort { name: None, port: 80, target_port: 80 }],
            }),
        );
        cache.insert(
            ObjectRef::new(ObjectKind::HttpProxy, "default", &name),
            CacheEntry::HttpProxy(HttpProxy {
                namespace: "default".into(),
                name: name.clone(),
                fqdn: Some(format!("{name}.example.com")),
                tls_secret_name: None,
                enable_fallback_certificate: false,
                includes: Vec::new(),
                routes: vec![HttpProxyRoute {
                    path: PathCondition::Prefix("/".into()),
                    headers: Vec::new(),
                    services: vec![HttpProxyService { name: name.clone(), port: 80, weight: 1 }],
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
    cache
}

fn bench_build(c: &mut Criterion) {
    let config = AppConfig::default();
    let mut group = c.benchmark_group("dag_build");
    for size in [10usize, 100, 1_000] {
        let cache = populated_cache(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let (dag, facts) = DagBuilder::new(black_box(&cache), black_box(&config)).build();
                black_box((dag, facts));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build);
criterion_main!(benches);
