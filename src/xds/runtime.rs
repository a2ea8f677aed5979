//! Builds the single Runtime (RTDS) resource this control plane emits.
//!
//! Contour does not expose per-object runtime layering; it carries a fixed
//! set of feature flags and Envoy-level tunables sourced entirely from
//! [`AppConfig`] (section 4.C "Runtime cache").

use envoy_types::pb::envoy::service::runtime::v3::Runtime;
use envoy_types::pb::google::protobuf::{value::Kind, Struct, Value};

use crate::config::AppConfig;
use crate::xds::resources::{BuiltResource, RUNTIME_TYPE_URL};

pub const RUNTIME_RESOURCE_NAME: &str = "contour-runtime";

pub fn build_runtime(config: &AppConfig) -> BuiltResource {
    let mut fields = std::collections::HashMap::new();
    fields.insert(
        "contour.disable_permit_insecure".to_string(),
        bool_value(config.ingress.disable_permit_insecure),
    );
    fields.insert(
        "contour.fallback_certificate_configured".to_string(),
        bool_value(config.tls.fallback_certificate.is_some()),
    );
    fields.insert(
        "contour.rate_limit_service_configured".to_string(),
        bool_value(config.rate_limit_service.is_some()),
    );

    let runtime =
        Runtime { name: RUNTIME_RESOURCE_NAME.to_string(), layer: Some(Struct { fields }) };

    BuiltResource::new(RUNTIME_RESOURCE_NAME, RUNTIME_TYPE_URL, &runtime)
}

fn bool_value(value: bool) -> Value {
    Value { kind: Some(Kind::BoolValue(value)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_resource_carries_fixed_name() {
        let built = build_runtime(&AppConfig::default());
        assert_eq!(built.name, RUNTIME_RESOURCE_NAME);
        assert_eq!(built.type_url(), RUNTIME_TYPE_URL);
    }
}
