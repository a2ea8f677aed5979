//! Translates [`crate::dag::VirtualHost`] nodes into Envoy
//! `RouteConfiguration` resources (RDS).
//!
//! Route ordering within a virtual host is not left to map iteration: Envoy
//! performs first-match, so routes are sorted most-specific-first before
//! being embedded (section 4.C "Route cache").

use std::collections::HashMap;

use envoy_types::pb::envoy::config::core::v3::HeaderValueOption;
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier,
    rate_limit::{action::ActionSpecifier, Action, GenericKey},
    redirect_action::RedirectResponseCode,
    route::Action as RouteActionSpecifier,
    route_action::ClusterSpecifier,
    route_match::PathSpecifier,
    weighted_cluster::ClusterWeight,
    DirectResponseAction, HeaderMatcher, RateLimit as RouteRateLimit, RedirectAction,
    RequestMirrorPolicy, Route as EnvoyRoute, RouteAction as EnvoyRouteAction, RouteConfiguration,
    RouteMatch as EnvoyRouteMatch, RetryPolicy, VirtualHost as EnvoyVirtualHost, WeightedCluster,
};
use envoy_types::pb::envoy::r#type::matcher::v3::RegexMatcher;
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, Duration, UInt32Value};

use crate::dag;
use crate::xds::filters::http::cors::{CorsConfig, CorsOriginMatcher, CorsPolicyConfig};

/// Builds a single `RouteConfiguration` from the virtual hosts bound to one
/// listener (insecure set or secure set — callers pick which).
pub fn build_route_configuration<'a>(
    name: &str,
    virtual_hosts: impl IntoIterator<Item = &'a dag::VirtualHost>,
) -> Result<RouteConfiguration, crate::ContourError> {
    let mut hosts = Vec::new();
    for vh in virtual_hosts {
        hosts.push(build_virtual_host(vh)?);
    }

    Ok(RouteConfiguration { name: name.to_string(), virtual_hosts: hosts, ..Default::default() })
}

fn build_virtual_host(vh: &dag::VirtualHost) -> Result<EnvoyVirtualHost, crate::ContourError> {
    let mut routes: Vec<&dag::Route> = vh.routes.iter().collect();
    routes.sort_by(|a, b| route_sort_key(b).cmp(&route_sort_key(a)));

    let mut typed_per_filter_config: HashMap<String, EnvoyAny> = HashMap::new();
    if let Some(cors) = &vh.cors_policy {
        typed_per_filter_config
            .insert("envoy.filters.http.cors".to_string(), build_cors_any(cors)?);
    }

    Ok(EnvoyVirtualHost {
        name: vh.fqdn.clone(),
        domains: vec![vh.fqdn.clone()],
        routes: routes.into_iter().map(build_route).collect(),
        request_headers_to_add: header_value_options(&vh.header_policy.request_headers_to_add),
        request_headers_to_remove: vh.header_policy.request_headers_to_remove.clone(),
        response_headers_to_add: header_value_options(&vh.header_policy.response_headers_to_add),
        response_headers_to_remove: vh.header_policy.response_headers_to_remove.clone(),
        rate_limits: vh.rate_limit_policy.as_ref().map(build_rate_limit).into_iter().collect(),
        typed_per_filter_config,
        ..Default::default()
    })
}

/// Specificity key used to sort routes most-specific-first: exact/regex
/// matches before prefix matches, longer match strings before shorter ones,
/// more header conditions before fewer, then a lexical tie-break (section
/// 4.C "Route cache").
fn route_sort_key(route: &dag::Route) -> (u8, usize, usize, std::cmp::Reverse<&str>) {
    let (rank, text) = match &route.r#match.path {
        dag::PathMatch::Exact(p) => (2u8, p.as_str()),
        dag::PathMatch::Regex(p) => (2u8, p.as_str()),
        dag::PathMatch::Prefix(p) => (1u8, p.as_str()),
    };
    (rank, text.len(), route.r#match.headers.len(), std::cmp::Reverse(text))
}

fn build_route(route: &dag::Route) -> EnvoyRoute {
    EnvoyRoute {
        r#match: Some(build_route_match(&route.r#match)),
        action: Some(build_route_action(&route.action)),
        request_headers_to_add: header_value_options(&route.header_policy.request_headers_to_add),
        request_headers_to_remove: route.header_policy.request_headers_to_remove.clone(),
        response_headers_to_add: header_value_options(&route.header_policy.response_headers_to_add),
        response_headers_to_remove: route.header_policy.response_headers_to_remove.clone(),
        ..Default::default()
    }
}

fn build_route_match(m: &dag::RouteMatch) -> EnvoyRouteMatch {
    let path_specifier = match &m.path {
        dag::PathMatch::Exact(p) => PathSpecifier::Path(p.clone()),
        dag::PathMatch::Prefix(p) => PathSpecifier::Prefix(p.clone()),
        dag::PathMatch::Regex(p) => {
            PathSpecifier::SafeRegex(RegexMatcher { regex: p.clone(), ..Default::default() })
        }
    };

    EnvoyRouteMatch {
        path_specifier: Some(path_specifier),
        headers: m.headers.iter().map(build_header_matcher).collect(),
        ..Default::default()
    }
}

fn build_header_matcher(header: &dag::HeaderMatch) -> HeaderMatcher {
    match header {
        dag::HeaderMatch::Present(name) => HeaderMatcher {
            name: name.clone(),
            header_match_specifier: Some(HeaderMatchSpecifier::PresentMatch(true)),
            ..Default::default()
        },
        dag::HeaderMatch::Exact(name, value) => HeaderMatcher {
            name: name.clone(),
            header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(
                envoy_types::pb::envoy::r#type::matcher::v3::StringMatcher {
                    match_pattern: Some(
                        envoy_types::pb::envoy::r#type::matcher::v3::string_matcher::MatchPattern::Exact(
                            value.clone(),
                        ),
                    ),
                    ignore_case: false,
                },
            )),
            ..Default::default()
        },
        dag::HeaderMatch::Contains(name, value) => HeaderMatcher {
            name: name.clone(),
            header_match_specifier: Some(HeaderMatchSpecifier::ContainsMatch(value.clone())),
            ..Default::default()
        },
        dag::HeaderMatch::NotContains(name, value) => HeaderMatcher {
            name: name.clone(),
            header_match_specifier: Some(HeaderMatchSpecifier::ContainsMatch(value.clone())),
            invert_match: true,
            ..Default::default()
        },
    }
}

fn build_route_action(action: &dag::RouteAction) -> RouteActionSpecifier {
    match action {
        dag::RouteAction::DirectResponse { status } => {
            RouteActionSpecifier::DirectResponse(DirectResponseAction {
                status: *status as u32,
                body: None,
            })
        }
        dag::RouteAction::Redirect { https } => RouteActionSpecifier::Redirect(RedirectAction {
            https_redirect: *https,
            response_code: RedirectResponseCode::MovedPermanently as i32,
            ..Default::default()
        }),
        dag::RouteAction::Forward {
            clusters,
            prefix_rewrite,
            timeout_seconds,
            retry_attempts,
            websocket: _,
            mirror_clusters,
        } => {
            let cluster_specifier = if clusters.len() == 1 {
                ClusterSpecifier::Cluster(clusters[0].cluster.clone())
            } else {
                let total_weight: u32 = clusters.iter().map(|c| c.weight).sum();
                ClusterSpecifier::WeightedClusters(WeightedCluster {
                    clusters: clusters
                        .iter()
                        .map(|c| ClusterWeight {
                            name: c.cluster.clone(),
                            weight: Some(UInt32Value { value: c.weight }),
                            ..Default::default()
                        })
                        .collect(),
                    total_weight: Some(UInt32Value { value: total_weight }),
                })
            };

            RouteActionSpecifier::Route(EnvoyRouteAction {
                cluster_specifier: Some(cluster_specifier),
                prefix_rewrite: prefix_rewrite.clone().unwrap_or_default(),
                timeout: timeout_seconds.map(|s| Duration { seconds: s as i64, nanos: 0 }),
                retry_policy: retry_attempts.map(|attempts| RetryPolicy {
                    retry_on: "5xx,connect-failure,refused-stream".to_string(),
                    num_retries: Some(UInt32Value { value: attempts }),
                    ..Default::default()
                }),
                request_mirror_policies: mirror_clusters
                    .iter()
                    .map(|cluster| RequestMirrorPolicy {
                        cluster: cluster.clone(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            })
        }
    }
}

fn header_value_options(pairs: &[(String, String)]) -> Vec<HeaderValueOption> {
    pairs
        .iter()
        .map(|(key, value)| HeaderValueOption {
            header: Some(envoy_types::pb::envoy::config::core::v3::HeaderValue {
                key: key.clone(),
                value: value.clone(),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect()
}

fn build_cors_any(cors: &crate::domain::CorsPolicy) -> Result<EnvoyAny, crate::ContourError> {
    let policy = CorsPolicyConfig {
        allow_origin: cors
            .allow_origins
            .iter()
            .map(|origin| CorsOriginMatcher::Exact { value: origin.clone() })
            .collect(),
        allow_methods: cors.allow_methods.clone(),
        allow_credentials: Some(cors.allow_credentials),
        ..Default::default()
    };
    CorsConfig { policy }.to_any()
}

/// Binds a virtual host's rate-limit policy to a descriptor action an
/// external rate-limit service can key requests on. The service's own
/// per-descriptor limit table (mapping this generic key to
/// `requests_per_unit`/`unit_seconds`) is external configuration, outside
/// this crate's scope.
fn build_rate_limit(policy: &crate::domain::RateLimitPolicy) -> RouteRateLimit {
    RouteRateLimit {
        actions: vec![Action {
            action_specifier: Some(ActionSpecifier::GenericKey(GenericKey {
                descriptor_value: format!("{}/{}", policy.requests_per_unit, policy.unit_seconds),
                descriptor_key: "contour-rate-limit".to_string(),
            })),
        }],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObjectKind, ObjectRef};

    fn route(path: dag::PathMatch, headers: usize) -> dag::Route {
        dag::Route {
            r#match: dag::RouteMatch {
                path,
                headers: (0..headers)
                    .map(|i| dag::HeaderMatch::Present(format!("h{i}")))
                    .collect(),
            },
            action: dag::RouteAction::Forward {
                clusters: vec![dag::WeightedCluster { cluster: "default/echo/80".into(), weight: 1 }],
                prefix_rewrite: None,
                timeout_seconds: None,
                retry_attempts: None,
                websocket: false,
                mirror_clusters: vec![],
            },
            header_policy: dag::HeaderPolicy::default(),
            resolution_error: None,
        }
    }

    fn vhost(routes: Vec<dag::Route>) -> dag::VirtualHost {
        dag::VirtualHost {
            fqdn: "basic.example.com".into(),
            routes,
            cors_policy: None,
            rate_limit_policy: None,
            header_policy: dag::HeaderPolicy::default(),
            secure: None,
            tcp_proxy: None,
            sources: vec![ObjectRef::new(ObjectKind::HttpProxy, "default", "basic")],
        }
    }

    #[test]
    fn exact_path_sorts_before_prefix() {
        let vh = vhost(vec![
            route(dag::PathMatch::Prefix("/".into()), 0),
            route(dag::PathMatch::Exact("/healthz".into()), 0),
        ]);
        let built = build_virtual_host(&vh).expect("build virtual host");
        let first = built.routes[0].r#match.as_ref().unwrap().path_specifier.clone();
        assert!(matches!(first, Some(PathSpecifier::Path(ref p)) if p == "/healthz"));
    }

    #[test]
    fn longer_prefix_sorts_before_shorter_prefix() {
        let vh = vhost(vec![
            route(dag::PathMatch::Prefix("/".into()), 0),
            route(dag::PathMatch::Prefix("/api".into()), 0),
        ]);
        let built = build_virtual_host(&vh).expect("build virtual host");
        let first = built.routes[0].r#match.as_ref().unwrap().path_specifier.clone();
        assert!(matches!(first, Some(PathSpecifier::Prefix(ref p)) if p == "/api"));
    }

    #[test]
    fn more_header_conditions_sort_first_within_same_path() {
        let vh = vhost(vec![
            route(dag::PathMatch::Prefix("/api".into()), 0),
            route(dag::PathMatch::Prefix("/api".into()), 2),
        ]);
        let built = build_virtual_host(&vh).expect("build virtual host");
        assert_eq!(built.routes[0].r#match.as_ref().unwrap().headers.len(), 2);
    }

    #[test]
    fn direct_response_action_emitted_for_missing_backend() {
        let mut r = route(dag::PathMatch::Prefix("/".into()), 0);
        r.action = dag::RouteAction::DirectResponse { status: 503 };
        let vh = vhost(vec![r]);
        let built = build_virtual_host(&vh).expect("build virtual host");
        match built.routes[0].action.as_ref().unwrap() {
            RouteActionSpecifier::DirectResponse(resp) => assert_eq!(resp.status, 503),
            other => panic!("expected direct response, got {:?}", other),
        }
    }
}
