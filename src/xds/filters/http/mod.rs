//! HTTP filter registry and builders.
//!
//! Defines a common configuration model for the Envoy HTTP filters this
//! control plane wires onto a listener's filter chain: the built-in router,
//! CORS (bound from `HttpProxy.cors_policy`), distributed rate limiting
//! (bound from `HttpProxy.rate_limit_policy`), and RBAC. Each filter module
//! converts its high-level config into an Envoy protobuf `Any` payload.

pub mod cors;
pub mod rate_limit;
pub mod rbac;

use crate::xds::filters::http::cors::{
    CorsConfig as CorsFilterConfig, CorsPerRouteConfig, FILTER_CORS_POLICY_TYPE_URL,
};
use crate::xds::filters::http::rate_limit::{RateLimitConfig, RateLimitPerRouteConfig};
use crate::xds::filters::http::rbac::{RbacConfig, RbacPerRouteConfig, RBAC_PER_ROUTE_TYPE_URL};
use crate::xds::filters::{any_from_message, invalid_config, Base64Bytes, TypedConfig};
use envoy_types::pb::envoy::extensions::filters::http::cors::v3::CorsPolicy as FilterCorsPolicyProto;
use envoy_types::pb::envoy::extensions::filters::http::rbac::v3::RbacPerRoute as RbacPerRouteProto;
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router as RouterFilter;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType as HttpFilterConfigType;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use prost::Message;

/// Envoy's canonical router filter name.
pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";

/// An entry in a listener's ordered HTTP filter chain.
#[derive(Debug, Clone)]
pub struct HttpFilterConfigEntry {
    pub name: Option<String>,
    pub is_optional: bool,
    pub disabled: bool,
    pub filter: HttpFilterKind,
}

/// The HTTP filter types this control plane knows how to emit.
#[derive(Debug, Clone)]
pub enum HttpFilterKind {
    /// Built-in Envoy router filter.
    Router,
    /// CORS filter, bound from `HttpProxy.cors_policy`.
    Cors(CorsFilterConfig),
    /// Distributed rate limit filter, bound from `HttpProxy.rate_limit_policy`.
    RateLimit(RateLimitConfig),
    /// RBAC filter.
    Rbac(RbacConfig),
    /// Arbitrary filter expressed as a typed config payload.
    Custom { config: TypedConfig },
}

impl HttpFilterKind {
    fn is_router(&self) -> bool {
        matches!(self, Self::Router)
    }

    fn default_name(&self) -> &'static str {
        match self {
            Self::Router => ROUTER_FILTER_NAME,
            Self::Cors(_) => "envoy.filters.http.cors",
            Self::RateLimit(_) => "envoy.filters.http.ratelimit",
            Self::Rbac(_) => "envoy.filters.http.rbac",
            Self::Custom { .. } => "custom.http.filter",
        }
    }

    fn to_any(&self) -> Result<Option<EnvoyAny>, crate::ContourError> {
        match self {
            Self::Router => Ok(Some(any_from_message(
                "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router",
                &RouterFilter::default(),
            ))),
            Self::Cors(cfg) => {
                cfg.policy.validate()?;
                Ok(Some(cors::filter_marker_any()))
            }
            Self::RateLimit(cfg) => cfg.to_any().map(Some),
            Self::Rbac(cfg) => cfg.to_any().map(Some),
            Self::Custom { config } => Ok(Some(config.to_any())),
        }
    }
}

/// Per-route overrides for HTTP filters.
#[derive(Debug, Clone)]
pub enum HttpScopedConfig {
    Cors(CorsPerRouteConfig),
    RateLimit(RateLimitPerRouteConfig),
    Rbac(RbacPerRouteConfig),
    Typed(TypedConfig),
}

impl HttpScopedConfig {
    pub fn to_any(&self) -> Result<EnvoyAny, crate::ContourError> {
        match self {
            Self::Typed(config) => Ok(config.to_any()),
            Self::Cors(cfg) => cfg.to_any(),
            Self::RateLimit(cfg) => cfg.to_any(),
            Self::Rbac(cfg) => cfg.to_any(),
        }
    }

    pub fn from_any(any: &EnvoyAny) -> Result<Self, crate::ContourError> {
        if any.type_url == FILTER_CORS_POLICY_TYPE_URL {
            let proto = FilterCorsPolicyProto::decode(any.value.as_slice()).map_err(|err| {
                crate::ContourError::config(format!("failed to decode CORS per-route config: {}", err))
            })?;
            let cfg = CorsPerRouteConfig::from_proto(&proto)?;
            return Ok(HttpScopedConfig::Cors(cfg));
        }

        if any.type_url == RBAC_PER_ROUTE_TYPE_URL {
            let proto = RbacPerRouteProto::decode(any.value.as_slice()).map_err(|err| {
                crate::ContourError::config(format!("failed to decode RBAC per-route config: {}", err))
            })?;
            let cfg = RbacPerRouteConfig::from_proto(&proto)?;
            return Ok(HttpScopedConfig::Rbac(cfg));
        }

        Ok(HttpScopedConfig::Typed(TypedConfig {
            type_url: any.type_url.clone(),
            value: Base64Bytes(any.value.clone()),
        }))
    }
}

/// Build an ordered Envoy HTTP filter list, ensuring the router filter is last.
pub fn build_http_filters(
    entries: &[HttpFilterConfigEntry],
) -> Result<Vec<HttpFilter>, crate::ContourError> {
    let mut filters = Vec::with_capacity(entries.len().max(1));
    let mut router_filter: Option<HttpFilter> = None;

    for entry in entries {
        let name = entry.name.clone().unwrap_or_else(|| entry.filter.default_name().to_string());

        let config_any = entry.filter.to_any()?;
        let filter = HttpFilter {
            name: name.clone(),
            is_optional: entry.is_optional,
            disabled: entry.disabled,
            config_type: config_any.map(HttpFilterConfigType::TypedConfig),
        };

        if entry.filter.is_router() || name == ROUTER_FILTER_NAME {
            if router_filter.is_some() {
                return Err(invalid_config("multiple router filters specified"));
            }
            router_filter = Some(filter);
        } else {
            filters.push(filter);
        }
    }

    filters.push(router_filter.unwrap_or_else(default_router_filter));

    Ok(filters)
}

fn default_router_filter() -> HttpFilter {
    HttpFilter {
        name: ROUTER_FILTER_NAME.to_string(),
        is_optional: false,
        disabled: false,
        config_type: Some(HttpFilterConfigType::TypedConfig(any_from_message(
            "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router",
            &RouterFilter::default(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::filters::http::cors::{CorsOriginMatcher, CorsPolicyConfig};

    #[test]
    fn router_is_appended_when_missing() {
        let filters = build_http_filters(&[]).expect("build filters");
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].name, ROUTER_FILTER_NAME);
    }

    #[test]
    fn router_must_be_unique() {
        let entries = vec![
            HttpFilterConfigEntry {
                name: None,
                is_optional: false,
                disabled: false,
                filter: HttpFilterKind::Router,
            },
            HttpFilterConfigEntry {
                name: None,
                is_optional: false,
                disabled: false,
                filter: HttpFilterKind::Router,
            },
        ];

        let err = build_http_filters(&entries).expect_err("duplicate router should fail");
        assert!(matches!(err, crate::ContourError::Config { .. }));
    }

    #[test]
    fn custom_filter_is_preserved() {
        let entries = vec![HttpFilterConfigEntry {
            name: Some("envoy.filters.http.custom".into()),
            is_optional: true,
            disabled: false,
            filter: HttpFilterKind::Custom {
                config: TypedConfig {
                    type_url: "type.googleapis.com/test.Custom".into(),
                    value: crate::xds::filters::Base64Bytes(vec![1, 2, 3]),
                },
            },
        }];

        let filters = build_http_filters(&entries).expect("build filters");
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].name, "envoy.filters.http.custom");
        assert!(filters[0].is_optional);
        assert_eq!(filters[1].name, ROUTER_FILTER_NAME);
    }

    #[test]
    fn cors_filter_emits_expected_typed_config() {
        let policy = CorsPolicyConfig {
            allow_origin: vec![CorsOriginMatcher::Exact { value: "https://example.com".into() }],
            ..Default::default()
        };

        let entries = vec![HttpFilterConfigEntry {
            name: None,
            is_optional: false,
            disabled: false,
            filter: HttpFilterKind::Cors(CorsFilterConfig { policy }),
        }];

        let filters = build_http_filters(&entries).expect("build filters");
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].name, "envoy.filters.http.cors");

        let typed = filters[0]
            .config_type
            .as_ref()
            .and_then(|config| match config {
                HttpFilterConfigType::TypedConfig(any) => Some(any),
                _ => None,
            })
            .expect("typed config present");

        assert_eq!(typed.type_url, crate::xds::filters::http::cors::CORS_FILTER_TYPE_URL);
    }

    #[test]
    fn cors_scoped_round_trip() {
        let scoped = HttpScopedConfig::Cors(CorsPerRouteConfig {
            policy: CorsPolicyConfig {
                allow_origin: vec![CorsOriginMatcher::Exact {
                    value: "https://service.example.com".into(),
                }],
                allow_methods: vec!["GET".into()],
                ..Default::default()
            },
        });

        let any = scoped.to_any().expect("to_any");
        assert_eq!(any.type_url, FILTER_CORS_POLICY_TYPE_URL);

        let restored = HttpScopedConfig::from_any(&any).expect("from_any");
        match restored {
            HttpScopedConfig::Cors(config) => {
                assert_eq!(config.policy.allow_methods, vec!["GET"]);
            }
            other => panic!("unexpected scoped config: {:?}", other),
        }
    }

    #[test]
    fn rate_limit_scoped_config_encodes_to_any() {
        let scoped = HttpScopedConfig::RateLimit(RateLimitPerRouteConfig {
            domain: Some("route-ratelimit-domain".into()),
            include_vh_rate_limits: false,
        });

        let any = scoped.to_any().expect("to_any");
        assert!(!any.value.is_empty());
    }
}
