//! Structured logging span macros.
//!
//! When OpenTelemetry tracing is enabled, every span here is bridged by
//! `tracing-opentelemetry`, so log lines carry `trace_id`/`span_id` for
//! correlation against the exported traces without any extra plumbing here.

/// Span for a single object-cache mutation (insert/remove).
#[macro_export]
macro_rules! cache_span {
    ($op:expr, $kind:expr, $namespace:expr, $name:expr) => {
        tracing::debug_span!(
            "cache_op",
            op = %$op,
            kind = %$kind,
            namespace = %$namespace,
            name = %$name
        )
    };
}

/// Span for one DAG build pass.
#[macro_export]
macro_rules! build_span {
    ($generation:expr) => {
        tracing::info_span!(
            "dag_build",
            generation = %$generation,
            build_id = %uuid::Uuid::new_v4()
        )
    };
}

/// Span for an xDS stream operation (request/response/push).
#[macro_export]
macro_rules! xds_span {
    ($operation:expr, $node_hash:expr) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            node_hash = %$node_hash,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $node_hash:expr, $($field:tt)*) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            node_hash = %$node_hash,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Span for a status-writer flush of one object.
#[macro_export]
macro_rules! status_span {
    ($kind:expr, $namespace:expr, $name:expr) => {
        tracing::debug_span!(
            "status_flush",
            kind = %$kind,
            namespace = %$namespace,
            name = %$name
        )
    };
}

/// Log the resolved configuration once at startup.
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        xds_address = %config.server.xds_address,
        xds_port = config.server.xds_port,
        admin_port = config.server.admin_port,
        node_hash = %config.server.node_hash,
        root_namespaces = ?config.ingress.root_namespaces,
        gateway_controller_name = ?config.ingress.gateway_controller_name,
        "contour control plane configuration"
    );
}
