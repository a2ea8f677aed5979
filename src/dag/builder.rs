//! The nine-pass builder described in section 4.B: index → collect roots →
//! per-FQDN merge → HTTPProxy inclusion → route synthesis → service
//! resolution → TLS resolution → policy binding → status emission.
//!
//! Passes are written as separate methods rather than one long function so
//! each one's failure mode stays local: a single bad object degrades that
//! object's corner of the DAG (a 503 route, an absent vhost, a status
//! condition) and never aborts the whole build, per the "local vs fatal"
//! error split in the crate-wide error type.

use std::collections::{BTreeMap, HashSet};

use sha2::{Digest, Sha256};

use crate::cache::{CacheEntry, ObjectCache};
use crate::config::AppConfig;
use crate::dag::nodes::{
    Cluster, Dag, Endpoint, EndpointSet, HeaderMatch as DagHeaderMatch, HeaderPolicy, PathMatch,
    Route, RouteAction, RouteMatch, Secret as DagSecret, SecretMaterial, SecureVirtualHostExtras,
    VirtualHost, WeightedCluster,
};
use crate::domain::{
    Condition, Gateway, GatewayClass, HeaderConditionOp, HttpProxy, HttpProxyRoute, ObjectKind,
    ObjectRef, PathCondition, PortSelector, ReferenceGrant, RoutingSource, RoutingSourceKind,
    Secret, SecretKind, Service, StatusFact, TlsCertificateDelegation,
};

type NamespacedKey = (String, String);

fn key_of(namespace: &str, name: &str) -> NamespacedKey {
    (namespace.to_string(), name.to_string())
}

/// Accumulates at most one [`StatusFact`] per object across a build, per
/// invariant 6 in section 8 ("the status writer receives exactly one
/// status fact per visited object per build cycle"). Later pushes for the
/// same object extend its condition list rather than opening a second
/// entry.
#[derive(Default)]
struct StatusAccumulator {
    facts: BTreeMap<ObjectRef, (crate::domain::Generation, Vec<Condition>)>,
}

impl StatusAccumulator {
    /// Replaces any existing condition of the same `condition_type` rather
    /// than appending, so a later rejecting pass (e.g. `DuplicateHostname`,
    /// `ServiceUnresolved`) overrides an earlier `Condition::valid()` for
    /// the same object instead of leaving two contradictory `Valid`
    /// conditions in the emitted `StatusFact`.
    fn push(&mut self, object: ObjectRef, generation: crate::domain::Generation, condition: Condition) {
        let entry = self.facts.entry(object).or_insert((generation, Vec::new()));
        entry.0 = generation;
        if let Some(existing) = entry.1.iter_mut().find(|c| c.condition_type == condition.condition_type) {
            *existing = condition;
        } else {
            entry.1.push(condition);
        }
    }

    fn finish(self) -> Vec<StatusFact> {
        self.facts
            .into_iter()
            .map(|(object, (generation, conditions))| StatusFact::new(object, generation, conditions))
            .collect()
    }
}

struct RootEntry {
    object: ObjectRef,
    kind: RoutingSourceKind,
    source: RoutingSource,
}

pub struct DagBuilder<'a> {
    cache: &'a ObjectCache,
    config: &'a AppConfig,
}

impl<'a> DagBuilder<'a> {
    pub fn new(cache: &'a ObjectCache, config: &'a AppConfig) -> Self {
        Self { cache, config }
    }

    /// Runs a full build pass over the current cache contents. Never
    /// blocks on anything external; callers (the workgroup's rebuild loop)
    /// are responsible for deciding when to call this.
    pub fn build(&self) -> (Dag, Vec<StatusFact>) {
        let mut status = StatusAccumulator::default();

        let services = self.index::<Service>(ObjectKind::Service, |e| match e {
            CacheEntry::Service(s) => Some(s),
            _ => None,
        });
        let secrets = self.index::<Secret>(ObjectKind::Secret, |e| match e {
            CacheEntry::Secret(s) => Some(s),
            _ => None,
        });
        let delegations: Vec<TlsCertificateDelegation> =
            self.cache.list(ObjectKind::TlsCertificateDelegation).into_iter().filter_map(
                |(_, e)| match e {
                    CacheEntry::TlsCertificateDelegation(d) => Some(d),
                    _ => None,
                },
            ).collect();
        let reference_grants: Vec<ReferenceGrant> = self
            .cache
            .list(ObjectKind::ReferenceGrant)
            .into_iter()
            .filter_map(|(_, e)| match e {
                CacheEntry::ReferenceGrant(g) => Some(g),
                _ => None,
            })
            .collect();
        let proxies = self.index::<HttpProxy>(ObjectKind::HttpProxy, |e| match e {
            CacheEntry::HttpProxy(p) => Some(p),
            _ => None,
        });
        let gateways = self.index::<Gateway>(ObjectKind::Gateway, |e| match e {
            CacheEntry::Gateway(g) => Some(g),
            _ => None,
        });
        let gateway_classes: BTreeMap<String, GatewayClass> = self
            .cache
            .list(ObjectKind::GatewayClass)
            .into_iter()
            .filter_map(|(_, e)| match e {
                CacheEntry::GatewayClass(c) => Some((c.name.clone(), c)),
                _ => None,
            })
            .collect();

        let mut roots = Vec::new();
        roots.extend(self.collect_ingress_roots(&mut status));
        roots.extend(self.collect_http_proxy_roots(&proxies, &mut status));
        roots.extend(self.collect_gateway_roots(&gateways, &gateway_classes, &mut status));

        let merged = self.merge_by_fqdn(roots, &proxies, &mut status);

        let mut dag = Dag::default();
        let mut referenced: HashSet<ObjectRef> = HashSet::new();

        for (fqdn, entries) in merged {
            self.build_virtual_host(
                fqdn,
                entries,
                &proxies,
                &services,
                &secrets,
                &delegations,
                &reference_grants,
                &mut dag,
                &mut referenced,
                &mut status,
            );
        }

        self.populate_endpoints(&mut dag);

        self.cache.prune_unreferenced(&referenced);

        (dag, status.finish())
    }

    fn index<T: Clone>(
        &self,
        kind: ObjectKind,
        extract: impl Fn(CacheEntry) -> Option<T>,
    ) -> BTreeMap<NamespacedKey, (ObjectRef, T)> {
        self.cache
            .list(kind)
            .into_iter()
            .filter_map(|(key, entry)| {
                extract(entry).map(|value| (key_of(&key.namespace, &key.name), (key, value)))
            })
            .collect()
    }

    // --- Pass 2: collect roots -------------------------------------------------

    fn collect_ingress_roots(&self, status: &mut StatusAccumulator) -> Vec<RootEntry> {
        let mut out = Vec::new();
        for (key, entry, generation) in self.cache.list_with_generations(ObjectKind::Ingress) {
            let CacheEntry::Ingress(ingress) = entry else { continue };
            let (class, mismatch) = ingress.effective_class();
            if mismatch {
                status.push(
                    key.clone(),
                    generation,
                    Condition::invalid(
                        "IngressClassDeprecatedMismatch",
                        "spec.ingressClassName and the kubernetes.io/ingress.class annotation disagree; the annotation wins",
                    ),
                );
            }
            if !self.config.ingress.allows_ingress_class(class) {
                status.push(
                    key.clone(),
                    generation,
                    Condition::invalid("IngressClassNotWatched", "ingress class is not in the watched set"),
                );
                continue;
            }
            if !self.config.ingress.allows_root_namespace(&key.namespace) {
                status.push(
                    key.clone(),
                    generation,
                    Condition::invalid("RootNamespaceNotAllowed", "namespace is not a configured root namespace"),
                );
                continue;
            }
            for source in RoutingSource::from_ingress(&ingress) {
                if source.hostnames.first().map(|h| h.is_empty()).unwrap_or(true) {
                    status.push(
                        key.clone(),
                        generation,
                        Condition::invalid("MissingHost", "a rule with no host is not supported"),
                    );
                    continue;
                }
                out.push(RootEntry { object: key.clone(), kind: RoutingSourceKind::Ingress, source });
            }
            if !mismatch {
                status.push(key, generation, Condition::valid());
            }
        }
        out
    }

    fn collect_http_proxy_roots(
        &self,
        proxies: &BTreeMap<NamespacedKey, (ObjectRef, HttpProxy)>,
        status: &mut StatusAccumulator,
    ) -> Vec<RootEntry> {
        let mut included: HashSet<NamespacedKey> = HashSet::new();
        let mut out = Vec::new();

        for (key, (object, proxy)) in proxies {
            if proxy.fqdn.is_none() {
                continue;
            }
            let generation = self.cache.generation_of(object).unwrap_or(0);
            if !self.config.ingress.allows_root_namespace(&object.namespace) {
                status.push(
                    object.clone(),
                    generation,
                    Condition::invalid("RootNamespaceNotAllowed", "namespace is not a configured root namespace"),
                );
                continue;
            }
            let mut visited = HashSet::new();
            visited.insert(key.clone());
            match resolve_includes(proxy, proxies, &mut visited, &mut included) {
                Ok(routes) => {
                    let mut source = match RoutingSource::from_http_proxy(proxy) {
                        Some(s) => s,
                        None => continue,
                    };
                    source.routes = routes;
                    out.push(RootEntry {
                        object: object.clone(),
                        kind: RoutingSourceKind::HttpProxy,
                        source,
                    });
                    status.push(object.clone(), generation, Condition::valid());
                }
                Err(err) => {
                    let message = err.message();
                    let reason = match &err {
                        IncludeError::Cycle(_) => "IncludeError: cycle",
                        IncludeError::MissingChild(_) => "IncludeError: missing child",
                    };
                    status.push(object.clone(), generation, Condition::invalid(reason, message.clone()));
                    if let IncludeError::Cycle(path) = &err {
                        for member_key in path {
                            if member_key == key {
                                continue;
                            }
                            if let Some((member_object, _)) = proxies.get(member_key) {
                                let member_generation = self.cache.generation_of(member_object).unwrap_or(0);
                                status.push(
                                    member_object.clone(),
                                    member_generation,
                                    Condition::invalid(reason, message.clone()),
                                );
                            }
                        }
                    }
                }
            }
        }

        for (key, (object, proxy)) in proxies {
            if proxy.fqdn.is_none() && !included.contains(key) {
                let generation = self.cache.generation_of(object).unwrap_or(0);
                status.push(
                    object.clone(),
                    generation,
                    Condition::orphaned("not included by any root HTTPProxy"),
                );
            }
        }

        out
    }

    fn collect_gateway_roots(
        &self,
        gateways: &BTreeMap<NamespacedKey, (ObjectRef, Gateway)>,
        gateway_classes: &BTreeMap<String, GatewayClass>,
        status: &mut StatusAccumulator,
    ) -> Vec<RootEntry> {
        let Some(controller_name) = self.config.ingress.gateway_controller_name.as_deref() else {
            return Vec::new();
        };

        let managed: Vec<&Gateway> = gateways
            .values()
            .filter(|(_, g)| {
                gateway_classes.get(&g.gateway_class_name).map(|c| c.controller_name == controller_name).unwrap_or(false)
            })
            .map(|(_, g)| g)
            .collect();

        let mut out = Vec::new();
        for (key, entry, generation) in self.cache.list_with_generations(ObjectKind::HttpRoute) {
            let CacheEntry::HttpRoute(route) = entry else { continue };
            let sources = RoutingSource::from_http_route(&route, &managed);
            if sources.is_empty() {
                status.push(
                    key.clone(),
                    generation,
                    Condition::orphaned("no parentRef resolves to a Gateway managed by this controller"),
                );
                continue;
            }
            for source in sources {
                out.push(RootEntry { object: key.clone(), kind: RoutingSourceKind::Gateway, source });
            }
            status.push(key, generation, Condition::valid());
        }
        out
    }

    // --- Pass 3: per-FQDN merge -------------------------------------------------

    fn merge_by_fqdn(
        &self,
        roots: Vec<RootEntry>,
        _proxies: &BTreeMap<NamespacedKey, (ObjectRef, HttpProxy)>,
        status: &mut StatusAccumulator,
    ) -> BTreeMap<String, Vec<RootEntry>> {
        let mut by_fqdn: BTreeMap<String, Vec<RootEntry>> = BTreeMap::new();
        for entry in roots {
            let fqdn = entry.source.hostnames.first().cloned().unwrap_or_default();
            by_fqdn.entry(fqdn).or_default().push(entry);
        }

        let mut merged = BTreeMap::new();
        for (fqdn, mut entries) in by_fqdn {
            entries.sort_by(|a, b| (&a.object.namespace, &a.object.name).cmp(&(&b.object.namespace, &b.object.name)));
            let (mut explicit, implicit): (Vec<_>, Vec<_>) =
                entries.into_iter().partition(|e| e.kind != RoutingSourceKind::Ingress);

            if explicit.is_empty() {
                merged.insert(fqdn, implicit);
                continue;
            }

            // Section 8 scenario 3 / invariant in section 3: non-identical
            // specs for the same FQDN reject *every* participant; only when
            // every explicit definition is byte-identical (modulo the
            // owning object) does a stable (namespace,name) tie-break admit
            // the lexically-first one.
            let winners = if explicit.len() == 1 {
                explicit
            } else {
                let first = &explicit[0];
                let all_identical = explicit[1..].iter().all(|e| {
                    e.source.routes == first.source.routes
                        && e.source.tls_secret_name == first.source.tls_secret_name
                        && e.source.enable_fallback_certificate == first.source.enable_fallback_certificate
                });

                if all_identical {
                    let mut iter = explicit.drain(..);
                    let winner = iter.next().expect("checked len > 1 above");
                    for loser in iter {
                        let generation = self.cache.generation_of(&loser.object).unwrap_or(0);
                        status.push(
                            loser.object,
                            generation,
                            Condition::invalid(
                                "DuplicateHostname",
                                format!(
                                    "{} already owns virtualhost.fqdn {fqdn} with an identical spec",
                                    winner.object
                                ),
                            ),
                        );
                    }
                    vec![winner]
                } else {
                    let names: Vec<String> =
                        explicit.iter().map(|e| e.object.to_string()).collect();
                    for entry in explicit.drain(..) {
                        let generation = self.cache.generation_of(&entry.object).unwrap_or(0);
                        status.push(
                            entry.object,
                            generation,
                            Condition::invalid(
                                "DuplicateHostname",
                                format!(
                                    "virtualhost.fqdn {fqdn} is claimed by conflicting objects: {}",
                                    names.join(", ")
                                ),
                            ),
                        );
                    }
                    vec![]
                }
            };

            for entry in implicit {
                let generation = self.cache.generation_of(&entry.object).unwrap_or(0);
                status.push(
                    entry.object,
                    generation,
                    Condition::invalid(
                        "DuplicateHostname",
                        format!("host {fqdn} is explicitly owned by an HTTPProxy or Gateway route"),
                    ),
                );
            }
            if !winners.is_empty() {
                merged.insert(fqdn, winners);
            }
        }
        merged
    }

    // --- Passes 5-8: route synthesis, service/TLS resolution, policy binding ---

    #[allow(clippy::too_many_arguments)]
    fn build_virtual_host(
        &self,
        fqdn: String,
        entries: Vec<RootEntry>,
        proxies: &BTreeMap<NamespacedKey, (ObjectRef, HttpProxy)>,
        services: &BTreeMap<NamespacedKey, (ObjectRef, Service)>,
        secrets: &BTreeMap<NamespacedKey, (ObjectRef, Secret)>,
        delegations: &[TlsCertificateDelegation],
        reference_grants: &[ReferenceGrant],
        dag: &mut Dag,
        referenced: &mut HashSet<ObjectRef>,
        status: &mut StatusAccumulator,
    ) {
        if fqdn.is_empty() || entries.is_empty() {
            return;
        }

        let mut routes = Vec::new();
        let mut sources = Vec::new();
        let mut tls_secret_name = None;
        let mut enable_fallback_certificate = false;
        let mut cors_policy = None;
        let mut rate_limit_policy = None;

        for entry in &entries {
            sources.push(entry.object.clone());
            if tls_secret_name.is_none() {
                tls_secret_name = entry.source.tls_secret_name.clone();
            }
            enable_fallback_certificate |= entry.source.enable_fallback_certificate;
            if entry.kind == RoutingSourceKind::HttpProxy {
                if let Some((_, proxy)) = proxies.get(&key_of(&entry.object.namespace, &entry.object.name)) {
                    cors_policy = cors_policy.or_else(|| proxy.cors_policy.clone());
                    rate_limit_policy = rate_limit_policy.or_else(|| proxy.rate_limit_policy.clone());
                }
            }
            for route in &entry.source.routes {
                if let Some(reason) = unsatisfiable_header_conditions(route) {
                    let generation = self.cache.generation_of(&entry.object).unwrap_or(0);
                    status.push(
                        entry.object.clone(),
                        generation,
                        Condition::invalid("UnsatisfiableHeaderConditions", reason),
                    );
                    continue;
                }
                let synthesized = self.synthesize_route(&entry.object, route, services, referenced, status);
                routes.push((synthesized, route.permit_insecure && !self.config.ingress.disable_permit_insecure));
            }
        }

        let secure = tls_secret_name.as_ref().map(|name| {
            self.resolve_tls(&entries[0].object, name, secrets, delegations, reference_grants, dag, referenced, status)
        });

        let secure_routes: Vec<Route> = routes.iter().map(|(route, _)| route.clone()).collect();
        let insecure_routes: Vec<Route> = routes
            .into_iter()
            .map(|(route, permit_insecure)| {
                if secure.is_some() && !permit_insecure {
                    Route {
                        r#match: route.r#match,
                        action: RouteAction::Redirect { https: true },
                        header_policy: route.header_policy,
                        resolution_error: None,
                    }
                } else {
                    route
                }
            })
            .collect();

        dag.insecure_virtual_hosts.insert(
            fqdn.clone(),
            VirtualHost {
                fqdn: fqdn.clone(),
                routes: insecure_routes,
                cors_policy: cors_policy.clone(),
                rate_limit_policy: rate_limit_policy.clone(),
                header_policy: HeaderPolicy::default(),
                secure: None,
                tcp_proxy: None,
                sources: sources.clone(),
            },
        );

        if let Some(secure) = secure {
            dag.secure_virtual_hosts.insert(
                fqdn.clone(),
                VirtualHost {
                    fqdn,
                    routes: secure_routes,
                    cors_policy,
                    rate_limit_policy,
                    header_policy: HeaderPolicy::default(),
                    secure: Some(secure),
                    tcp_proxy: None,
                    sources,
                },
            );
        }
    }

    fn synthesize_route(
        &self,
        owner: &ObjectRef,
        route: &HttpProxyRoute,
        services: &BTreeMap<NamespacedKey, (ObjectRef, Service)>,
        referenced: &mut HashSet<ObjectRef>,
        status: &mut StatusAccumulator,
    ) -> Route {
        let r#match = RouteMatch {
            path: match &route.path {
                PathCondition::Prefix(p) => PathMatch::Prefix(p.clone()),
                PathCondition::Exact(p) => PathMatch::Exact(p.clone()),
                PathCondition::Regex(p) => PathMatch::Regex(p.clone()),
            },
            headers: route
                .headers
                .iter()
                .map(|h| {
                    let name = h.name.to_ascii_lowercase();
                    match &h.op {
                        HeaderConditionOp::Present => DagHeaderMatch::Present(name),
                        HeaderConditionOp::Contains(v) => DagHeaderMatch::Contains(name, v.clone()),
                        HeaderConditionOp::NotContains(v) => DagHeaderMatch::NotContains(name, v.clone()),
                        HeaderConditionOp::Exact(v) => DagHeaderMatch::Exact(name, v.clone()),
                    }
                })
                .collect(),
        };

        let mut clusters = Vec::new();
        let mut resolution_error = None;
        for backend in &route.services {
            let service_key = key_of(&owner.namespace, &backend.name);
            match services.get(&service_key) {
                Some((service_ref, service)) => {
                    match service.port(&PortSelector::Number(backend.port)) {
                        Some(_) => {
                            referenced.insert(service_ref.clone());
                            clusters.push(WeightedCluster {
                                cluster: Dag::cluster_key(service_ref, backend.port),
                                weight: backend.weight.max(1),
                            });
                        }
                        None => {
                            resolution_error = Some(format!(
                                "service {}/{} has no port {}",
                                owner.namespace, backend.name, backend.port
                            ));
                        }
                    }
                }
                None => {
                    resolution_error =
                        Some(format!("service {}/{} not found", owner.namespace, backend.name));
                }
            }
        }

        let action = if let Some(reason) = &resolution_error {
            let generation = self.cache.generation_of(owner).unwrap_or(0);
            status.push(
                owner.clone(),
                generation,
                Condition::invalid("ServiceUnresolved", reason.clone()),
            );
            RouteAction::DirectResponse { status: 503 }
        } else {
            RouteAction::Forward {
                clusters,
                prefix_rewrite: route.prefix_rewrite.clone(),
                timeout_seconds: route.timeout_seconds,
                retry_attempts: route.retry_attempts,
                websocket: route.websocket,
                mirror_clusters: route
                    .mirror_services
                    .iter()
                    .filter_map(|name| {
                        services.get(&key_of(&owner.namespace, name)).map(|(service_ref, _)| {
                            referenced.insert(service_ref.clone());
                            Dag::cluster_key(service_ref, 0)
                        })
                    })
                    .collect(),
            }
        };

        Route { r#match, action, header_policy: HeaderPolicy::default(), resolution_error }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_tls(
        &self,
        owner: &ObjectRef,
        secret_name: &str,
        secrets: &BTreeMap<NamespacedKey, (ObjectRef, Secret)>,
        delegations: &[TlsCertificateDelegation],
        reference_grants: &[ReferenceGrant],
        dag: &mut Dag,
        referenced: &mut HashSet<ObjectRef>,
        status: &mut StatusAccumulator,
    ) -> SecureVirtualHostExtras {
        let (secret_namespace, secret_name) = match secret_name.split_once('/') {
            Some((ns, name)) => (ns.to_string(), name.to_string()),
            None => (owner.namespace.clone(), secret_name.to_string()),
        };

        let cross_namespace = secret_namespace != owner.namespace;
        let delegated = !cross_namespace
            || delegations.iter().any(|d| d.namespace == secret_namespace && d.permits(&secret_name, &owner.namespace))
            || reference_grants.iter().any(|g| {
                g.namespace == secret_namespace
                    && g.from_namespace == owner.namespace
                    && g.to_kind == ObjectKind::Secret
                    && g.to_name.as_deref().map(|n| n == secret_name).unwrap_or(true)
            });

        let invalid = if !delegated {
            Some((
                "TLSSecretNotPermitted",
                format!(
                    "secret {secret_namespace}/{secret_name} is not delegated to namespace {}",
                    owner.namespace
                ),
            ))
        } else {
            match secrets.get(&key_of(&secret_namespace, &secret_name)) {
                Some((secret_ref, secret)) => {
                    referenced.insert(secret_ref.clone());
                    let key = secret_ref.namespaced_name();
                    if !dag.secrets.contains_key(&key) {
                        if let Some(node) = build_secret_node(secret_ref, secret) {
                            dag.secrets.insert(key, node);
                        }
                    }
                    None
                }
                None => Some((
                    "TLSSecretUnresolved",
                    format!("secret {secret_namespace}/{secret_name} not found"),
                )),
            }
        };

        if let Some((reason, message)) = &invalid {
            let generation = self.cache.generation_of(owner).unwrap_or(0);
            status.push(owner.clone(), generation, Condition::invalid(*reason, message.clone()));
        }
        let invalid = invalid.map(|(_, message)| message);

        SecureVirtualHostExtras {
            secret: format!("{secret_namespace}/{secret_name}"),
            minimum_protocol_version: self.config.tls.minimum_protocol_version,
            maximum_protocol_version: self.config.tls.maximum_protocol_version,
            cipher_suites: self.config.tls.cipher_suites.clone(),
            fallback_certificate: self.config.tls.fallback_certificate.is_some(),
            invalid,
        }
    }

    // --- Pass: cluster + endpoint synthesis -------------------------------------

    fn populate_endpoints(&self, dag: &mut Dag) {
        // Both the weighted forwarding set and the mirror set name clusters
        // that must exist in the CDS set (section 8 invariant 3); a route's
        // `RequestMirrorPolicy` points at a cluster the way its primary
        // `ClusterSpecifier` does, so both are materialized here.
        let referenced_clusters: BTreeMap<String, (ObjectRef, u16)> = dag
            .insecure_virtual_hosts
            .values()
            .chain(dag.secure_virtual_hosts.values())
            .flat_map(|vh| &vh.routes)
            .filter_map(|route| match &route.action {
                RouteAction::Forward { clusters, mirror_clusters, .. } => {
                    let mut keys: Vec<String> = clusters.iter().map(|w| w.cluster.clone()).collect();
                    keys.extend(mirror_clusters.iter().cloned());
                    Some(keys)
                }
                _ => None,
            })
            .flatten()
            .filter_map(|key| parse_cluster_key(&key))
            .map(|(service, port)| (Dag::cluster_key(&service, port), (service, port)))
            .collect();

        for (key, (service, port)) in referenced_clusters {
            dag.clusters.entry(key.clone()).or_insert_with(|| Cluster {
                key: key.clone(),
                service: service.clone(),
                port,
                load_balancing: crate::dag::nodes::LoadBalancingPolicy::RoundRobin,
                protocol: crate::dag::nodes::UpstreamProtocol::Http,
                upstream_tls: None,
                health_check: None,
                circuit_breaker: None,
                include_unready_endpoints: false,
            });

            let addresses: Vec<(bool, Endpoint)> = self
                .cache
                .list(ObjectKind::EndpointSlice)
                .into_iter()
                .filter_map(|(_, e)| match e {
                    CacheEntry::EndpointSlice(s) if s.namespace == service.namespace && s.service_name == service.name => {
                        Some(s)
                    }
                    _ => None,
                })
                .flat_map(|slice| slice.addresses)
                .map(|a| (a.ready, Endpoint { ip: a.ip, port: if a.port != 0 { a.port } else { port } }))
                .collect();

            // Overlapping EndpointSlices for the same Service can repeat an
            // address; dedup by (ip, port) before splitting into ready/unready
            // (section 4.C "Endpoint cache": "Addresses are deduplicated").
            // An address seen ready in any slice counts as ready overall.
            let mut deduped: BTreeMap<(String, u16), bool> = BTreeMap::new();
            for (ready, endpoint) in addresses {
                let entry = deduped.entry((endpoint.ip, endpoint.port)).or_insert(false);
                *entry = *entry || ready;
            }

            let ready = deduped
                .iter()
                .filter(|(_, ready)| **ready)
                .map(|((ip, port), _)| Endpoint { ip: ip.clone(), port: *port })
                .collect();
            let unready = deduped
                .iter()
                .filter(|(_, ready)| !**ready)
                .map(|((ip, port), _)| Endpoint { ip: ip.clone(), port: *port })
                .collect();
            dag.endpoints.insert(key.clone(), EndpointSet { cluster: key, ready, unready });
        }
    }
}

fn parse_cluster_key(key: &str) -> Option<(ObjectRef, u16)> {
    let mut parts = key.rsplitn(2, '/');
    let port: u16 = parts.next()?.parse().ok()?;
    let rest = parts.next()?;
    let (namespace, name) = rest.split_once('/')?;
    Some((ObjectRef::new(ObjectKind::Service, namespace, name), port))
}

fn build_secret_node(secret_ref: &ObjectRef, secret: &Secret) -> Option<DagSecret> {
    let material = match secret.kind {
        SecretKind::TlsCertificate => SecretMaterial::Certificate {
            chain_pem: secret.certificate_chain.clone()?,
            private_key_pem: secret.private_key.clone()?,
        },
        SecretKind::CertificateAuthorityBundle => {
            SecretMaterial::CaBundle { trusted_ca_pem: secret.certificate_chain.clone()? }
        }
        SecretKind::Opaque => return None,
    };
    let mut hasher = Sha256::new();
    match &material {
        SecretMaterial::Certificate { chain_pem, private_key_pem } => {
            hasher.update(chain_pem.as_bytes());
            hasher.update(private_key_pem.as_bytes());
        }
        SecretMaterial::CaBundle { trusted_ca_pem } => hasher.update(trusted_ca_pem.as_bytes()),
    }
    let digest = hasher.finalize();
    let content_hash_prefix = hex::encode(&digest[..8]);

    Some(DagSecret {
        key: secret_ref.namespaced_name(),
        source: secret_ref.clone(),
        material,
        content_hash_prefix,
    })
}

/// An include-resolution failure. `Cycle` carries every `(namespace,name)`
/// on the path from the root to (and including) the revisited proxy, so
/// the caller can mark every participant invalid per section 3's "any
/// cycle causes every HTTPProxy on the cycle to be marked invalid".
enum IncludeError {
    Cycle(Vec<NamespacedKey>),
    MissingChild(String),
}

impl IncludeError {
    fn message(&self) -> String {
        match self {
            IncludeError::Cycle(path) => format!(
                "include cycle: {}",
                path.iter().map(|(ns, name)| format!("{ns}/{name}")).collect::<Vec<_>>().join(" -> ")
            ),
            IncludeError::MissingChild(reason) => reason.clone(),
        }
    }
}

/// Recursively expands an HTTPProxy's `spec.includes`, detecting cycles via
/// `visited` and recording every proxy actually reached in `included` so
/// the caller can flag the ones nothing ever includes as orphaned (section
/// 4.B pass 4, section 8 scenario 2).
fn resolve_includes(
    proxy: &HttpProxy,
    proxies: &BTreeMap<NamespacedKey, (ObjectRef, HttpProxy)>,
    visited: &mut HashSet<NamespacedKey>,
    included: &mut HashSet<NamespacedKey>,
) -> Result<Vec<HttpProxyRoute>, IncludeError> {
    let mut routes = proxy.routes.clone();
    for include in &proxy.includes {
        let namespace = include.namespace.clone().unwrap_or_else(|| proxy.namespace.clone());
        let key = key_of(&namespace, &include.name);
        included.insert(key.clone());

        if visited.contains(&key) {
            let mut path: Vec<NamespacedKey> = visited.iter().cloned().collect();
            path.sort();
            path.push(key);
            return Err(IncludeError::Cycle(path));
        }
        let Some((_, child)) = proxies.get(&key) else {
            return Err(IncludeError::MissingChild(format!(
                "included HTTPProxy {namespace}/{} does not exist",
                include.name
            )));
        };

        visited.insert(key.clone());
        let child_routes = resolve_includes(child, proxies, visited, included)?;
        visited.remove(&key);

        for mut route in child_routes {
            if let Some(prefix) = &include.condition_prefix {
                route.path = prepend_prefix(prefix, route.path);
            }
            routes.push(route);
        }
    }
    Ok(routes)
}

/// Section 3 invariant: a `contains: x` and a `notcontains: x` on the same
/// (lower-cased) header name can never both match a single request, so the
/// route as a whole is unsatisfiable and is rejected wholesale rather than
/// programmed with dead conditions.
fn unsatisfiable_header_conditions(route: &HttpProxyRoute) -> Option<String> {
    let mut contains: HashSet<(String, &str)> = HashSet::new();
    let mut not_contains: HashSet<(String, &str)> = HashSet::new();
    for header in &route.headers {
        let name = header.name.to_ascii_lowercase();
        match &header.op {
            HeaderConditionOp::Contains(v) => {
                contains.insert((name, v.as_str()));
            }
            HeaderConditionOp::NotContains(v) => {
                not_contains.insert((name, v.as_str()));
            }
            HeaderConditionOp::Present | HeaderConditionOp::Exact(_) => {}
        }
    }
    contains.intersection(&not_contains).next().map(|(name, value)| {
        format!("header {name} has both a contains and a notcontains condition on {value:?}")
    })
}

fn prepend_prefix(prefix: &str, path: PathCondition) -> PathCondition {
    let trimmed = prefix.trim_end_matches('/');
    match path {
        PathCondition::Prefix(p) => PathCondition::Prefix(format!("{trimmed}{p}")),
        PathCondition::Exact(p) => PathCondition::Exact(format!("{trimmed}{p}")),
        PathCondition::Regex(p) => PathCondition::Regex(format!("{trimmed}{p}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ObjectCache;
    use crate::domain::{HttpProxyService, ServicePort};

    fn config() -> AppConfig {
        AppConfig::default()
    }

    fn service(namespace: &str, name: &str, port: u16) -> CacheEntry {
        CacheEntry::Service(Service {
            namespace: namespace.into(),
            name: name.into(),
            ports: vec![ServicePort { name: None, port, target_port: port }],
        })
    }

    fn proxy(namespace: &str, name: &str, fqdn: &str, backend: &str, port: u16) -> CacheEntry {
        CacheEntry::HttpProxy(HttpProxy {
            namespace: namespace.into(),
            name: name.into(),
            fqdn: Some(fqdn.into()),
            tls_secret_name: None,
            enable_fallback_certificate: false,
            includes: Vec::new(),
            routes: vec![HttpProxyRoute {
                path: PathCondition::Prefix("/".into()),
                headers: Vec::new(),
                services: vec![HttpProxyService { name: backend.into(), port, weight: 1 }],
                prefix_rewrite: None,
                timeout_seconds: None,
                retry_attempts: None,
                websocket: false,
                mirror_services: Vec::new(),
                permit_insecure: true,
            }],
            rate_limit_policy: None,
            cors_policy: None,
        })
    }

    #[test]
    fn basic_http_proxy_route_resolves_to_a_forwarding_route() {
        let cache = ObjectCache::new(false);
        cache.insert(ObjectRef::new(ObjectKind::Service, "default", "echo"), service("default", "echo", 80));
        cache.insert(
            ObjectRef::new(ObjectKind::HttpProxy, "default", "root"),
            proxy("default", "root", "echo.example.com", "echo", 80),
        );
        let cfg = config();
        let (dag, statuses) = DagBuilder::new(&cache, &cfg).build();

        let vhost = dag.insecure_virtual_hosts.get("echo.example.com").expect("vhost present");
        assert_eq!(vhost.routes.len(), 1);
        assert!(matches!(vhost.routes[0].action, RouteAction::Forward { .. }));
        assert!(statuses.iter().any(|s| s.conditions.iter().any(|c| c.status == crate::domain::ConditionStatus::True)));
    }

    #[test]
    fn missing_backend_synthesizes_a_503() {
        let cache = ObjectCache::new(false);
        cache.insert(
            ObjectRef::new(ObjectKind::HttpProxy, "default", "root"),
            proxy("default", "root", "echo.example.com", "missing", 80),
        );
        let cfg = config();
        let (dag, statuses) = DagBuilder::new(&cache, &cfg).build();

        let vhost = dag.insecure_virtual_hosts.get("echo.example.com").unwrap();
        assert!(matches!(vhost.routes[0].action, RouteAction::DirectResponse { status: 503 }));
        assert!(statuses.iter().any(|s| s.conditions.iter().any(|c| c.reason == "ServiceUnresolved")));
    }

    #[test]
    fn duplicate_fqdn_with_non_identical_specs_rejects_every_participant() {
        let cache = ObjectCache::new(false);
        cache.insert(ObjectRef::new(ObjectKind::Service, "default", "a"), service("default", "a", 80));
        cache.insert(ObjectRef::new(ObjectKind::Service, "default", "b"), service("default", "b", 80));
        cache.insert(
            ObjectRef::new(ObjectKind::HttpProxy, "default", "a"),
            proxy("default", "a", "dup.example.com", "a", 80),
        );
        cache.insert(
            ObjectRef::new(ObjectKind::HttpProxy, "default", "b"),
            proxy("default", "b", "dup.example.com", "b", 80),
        );
        let cfg = config();
        let (dag, statuses) = DagBuilder::new(&cache, &cfg).build();

        assert!(dag.insecure_virtual_hosts.get("dup.example.com").is_none());
        let rejected: Vec<_> = statuses
            .iter()
            .filter(|s| s.conditions.iter().any(|c| c.reason == "DuplicateHostname"))
            .collect();
        assert_eq!(rejected.len(), 2);
    }

    #[test]
    fn duplicate_fqdn_with_identical_specs_admits_lexically_first() {
        let cache = ObjectCache::new(false);
        cache.insert(ObjectRef::new(ObjectKind::Service, "default", "echo"), service("default", "echo", 80));
        cache.insert(
            ObjectRef::new(ObjectKind::HttpProxy, "default", "a"),
            proxy("default", "a", "dup.example.com", "echo", 80),
        );
        cache.insert(
            ObjectRef::new(ObjectKind::HttpProxy, "default", "b"),
            proxy("default", "b", "dup.example.com", "echo", 80),
        );
        let cfg = config();
        let (dag, statuses) = DagBuilder::new(&cache, &cfg).build();

        let vhost = dag.insecure_virtual_hosts.get("dup.example.com").expect("one survivor admitted");
        assert_eq!(vhost.sources.len(), 1);
        assert_eq!(vhost.sources[0].name, "a");
        assert!(statuses.iter().any(|s| s.object.name == "b"
            && s.conditions.iter().any(|c| c.reason == "DuplicateHostname")));
    }

    #[test]
    fn unsatisfiable_header_condition_rejects_only_that_route() {
        let cache = ObjectCache::new(false);
        cache.insert(ObjectRef::new(ObjectKind::Service, "default", "echo"), service("default", "echo", 80));
        let mut p = match proxy("default", "root", "headers.example.com", "echo", 80) {
            CacheEntry::HttpProxy(p) => p,
            _ => unreachable!(),
        };
        p.routes.push(HttpProxyRoute {
            path: PathCondition::Prefix("/bad".into()),
            headers: vec![
                crate::domain::HeaderCondition {
                    name: "X-Flag".into(),
                    op: HeaderConditionOp::Contains("on".into()),
                },
                crate::domain::HeaderCondition {
                    name: "x-flag".into(),
                    op: HeaderConditionOp::NotContains("on".into()),
                },
            ],
            services: vec![crate::domain::HttpProxyService { name: "echo".into(), port: 80, weight: 1 }],
            prefix_rewrite: None,
            timeout_seconds: None,
            retry_attempts: None,
            websocket: false,
            mirror_services: Vec::new(),
            permit_insecure: true,
        });
        cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "default", "root"), CacheEntry::HttpProxy(p));

        let cfg = config();
        let (dag, statuses) = DagBuilder::new(&cache, &cfg).build();

        let vhost = dag.insecure_virtual_hosts.get("headers.example.com").expect("vhost present");
        assert_eq!(vhost.routes.len(), 1, "the unsatisfiable /bad route is dropped, the / route survives");
        assert!(matches!(&vhost.routes[0].r#match.path, PathMatch::Prefix(p) if p == "/"));
        assert!(statuses
            .iter()
            .any(|s| s.conditions.iter().any(|c| c.reason == "UnsatisfiableHeaderConditions")));
    }

    #[test]
    fn include_cycle_marks_every_participant_invalid() {
        use crate::domain::HttpProxyInclude;

        let cache = ObjectCache::new(false);
        let mut root = match proxy("default", "root", "cycle.example.com", "echo", 80) {
            CacheEntry::HttpProxy(p) => p,
            _ => unreachable!(),
        };
        root.routes.clear();
        root.includes =
            vec![HttpProxyInclude { name: "child-a".into(), namespace: None, condition_prefix: None }];
        cache.insert(ObjectRef::new(ObjectKind::HttpProxy, "default", "root"), CacheEntry::HttpProxy(root));

        let mut child_a = match proxy("default", "child-a", "unused-a", "echo", 80) {
            CacheEntry::HttpProxy(p) => p,
            _ => unreachable!(),
        };
        child_a.fqdn = None;
        child_a.routes.clear();
        child_a.includes =
            vec![HttpProxyInclude { name: "child-b".into(), namespace: None, condition_prefix: None }];
        cache.insert(
            ObjectRef::new(ObjectKind::HttpProxy, "default", "child-a"),
            CacheEntry::HttpProxy(child_a),
        );

        let mut child_b = match proxy("default", "child-b", "unused-b", "echo", 80) {
            CacheEntry::HttpProxy(p) => p,
            _ => unreachable!(),
        };
        child_b.fqdn = None;
        child_b.routes.clear();
        child_b.includes =
            vec![HttpProxyInclude { name: "child-a".into(), namespace: None, condition_prefix: None }];
        cache.insert(
            ObjectRef::new(ObjectKind::HttpProxy, "default", "child-b"),
            CacheEntry::HttpProxy(child_b),
        );

        let cfg = config();
        let (dag, statuses) = DagBuilder::new(&cache, &cfg).build();

        assert!(dag.insecure_virtual_hosts.get("cycle.example.com").is_none());
        for name in ["root", "child-a", "child-b"] {
            let fact = statuses.iter().find(|s| s.object.name == name).unwrap_or_else(|| panic!("{name} has a status fact"));
            assert!(
                fact.conditions.iter().any(|c| c.reason == "IncludeError: cycle"),
                "{name} should be marked invalid for the cycle"
            );
        }
    }

    #[test]
    fn determinism_same_inputs_produce_an_identical_dag() {
        let cache = ObjectCache::new(false);
        cache.insert(ObjectRef::new(ObjectKind::Service, "default", "echo"), service("default", "echo", 80));
        cache.insert(
            ObjectRef::new(ObjectKind::HttpProxy, "default", "root"),
            proxy("default", "root", "echo.example.com", "echo", 80),
        );
        let cfg = config();
        let (first, _) = DagBuilder::new(&cache, &cfg).build();
        let (second, _) = DagBuilder::new(&cache, &cfg).build();
        assert_eq!(format!("{first:?}"), format!("{second:?}"));
    }
}
