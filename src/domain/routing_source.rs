//! The `RoutingSource` seam from the design notes: Ingress, HTTPProxy, and
//! Gateway-API `HTTPRoute` all project into the same per-FQDN VirtualHost
//! shape. The builder dispatches once per source kind and folds the result
//! into one structure instead of growing a parallel code path per CRD.

use crate::domain::{
    Gateway, HttpProxy, HttpProxyRoute, HttpRoute, Ingress, IngressRule, ObjectRef, PathCondition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingSourceKind {
    Ingress,
    HttpProxy,
    Gateway,
}

/// A normalized view over the three root object kinds, exposing just the
/// capability set the builder's merge pass needs: hostnames, routes, a TLS
/// secret binding, and the object to report status back onto.
#[derive(Debug, Clone)]
pub struct RoutingSource {
    pub kind: RoutingSourceKind,
    pub object: ObjectRef,
    pub hostnames: Vec<String>,
    pub tls_secret_name: Option<String>,
    pub enable_fallback_certificate: bool,
    pub routes: Vec<HttpProxyRoute>,
}

impl RoutingSource {
    pub fn from_ingress(ingress: &Ingress) -> Vec<Self> {
        let mut by_host: std::collections::BTreeMap<String, Vec<HttpProxyRoute>> =
            std::collections::BTreeMap::new();

        for rule in &ingress.rules {
            let host = rule.host.clone().unwrap_or_default();
            by_host.entry(host).or_default().push(ingress_rule_to_route(rule));
        }

        by_host
            .into_iter()
            .map(|(host, routes)| {
                let tls_secret_name = ingress
                    .tls_hosts
                    .iter()
                    .find(|(h, _)| h == &host || h.is_empty())
                    .map(|(_, secret)| secret.clone());

                RoutingSource {
                    kind: RoutingSourceKind::Ingress,
                    object: ObjectRef::new(
                        crate::domain::ObjectKind::Ingress,
                        ingress.namespace.clone(),
                        ingress.name.clone(),
                    ),
                    hostnames: vec![host],
                    tls_secret_name,
                    enable_fallback_certificate: false,
                    routes,
                }
            })
            .collect()
    }

    pub fn from_http_proxy(proxy: &HttpProxy) -> Option<Self> {
        let fqdn = proxy.fqdn.clone()?;
        Some(RoutingSource {
            kind: RoutingSourceKind::HttpProxy,
            object: ObjectRef::new(
                crate::domain::ObjectKind::HttpProxy,
                proxy.namespace.clone(),
                proxy.name.clone(),
            ),
            hostnames: vec![fqdn],
            tls_secret_name: proxy.tls_secret_name.clone(),
            enable_fallback_certificate: proxy.enable_fallback_certificate,
            routes: proxy.routes.clone(),
        })
    }

    /// Projects a Gateway-API `HTTPRoute` onto one `RoutingSource` per
    /// `(parent gateway, hostname)` pair. The TLS secret binding, if any,
    /// is inherited from whichever parent listener names a matching
    /// hostname and carries a certificate ref (section 3 "Gateway API
    /// surface").
    pub fn from_http_route(route: &HttpRoute, gateways: &[&Gateway]) -> Vec<Self> {
        let mut out = Vec::new();
        for parent in gateways {
            let parent_ref = ObjectRef::new(
                crate::domain::ObjectKind::Gateway,
                parent.namespace.clone(),
                parent.name.clone(),
            );
            if !route.parent_gateways.contains(&parent_ref) {
                continue;
            }
            for hostname in &route.hostnames {
                let listener = parent.listeners.iter().find(|l| match &l.hostname {
                    Some(h) => h == hostname,
                    None => true,
                });
                let tls_secret_name = listener
                    .and_then(|l| l.tls_secret_ref.as_ref())
                    .map(|s| s.name.clone());

                out.push(RoutingSource {
                    kind: RoutingSourceKind::Gateway,
                    object: ObjectRef::new(
                        crate::domain::ObjectKind::HttpRoute,
                        route.namespace.clone(),
                        route.name.clone(),
                    ),
                    hostnames: vec![hostname.clone()],
                    tls_secret_name,
                    enable_fallback_certificate: false,
                    routes: route.routes.clone(),
                });
            }
        }
        out
    }
}

fn ingress_rule_to_route(rule: &IngressRule) -> HttpProxyRoute {
    let path = if rule.path_type_exact {
        PathCondition::Exact(rule.path.clone())
    } else {
        PathCondition::Prefix(rule.path.clone())
    };

    HttpProxyRoute {
        path,
        headers: Vec::new(),
        services: vec![crate::domain::HttpProxyService {
            name: rule.backend_service.clone(),
            port: match &rule.backend_port {
                crate::domain::PortSelector::Number(n) => *n,
                crate::domain::PortSelector::Name(_) => 0,
            },
            weight: 1,
        }],
        prefix_rewrite: None,
        timeout_seconds: None,
        retry_attempts: None,
        websocket: false,
        mirror_services: Vec::new(),
        permit_insecure: true,
    }
}
