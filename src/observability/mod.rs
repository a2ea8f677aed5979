//! Observability infrastructure: structured logging, distributed tracing,
//! metrics, and the gRPC tracing middleware.

pub mod grpc_tracing;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use grpc_tracing::GrpcTracingLayer;
pub use logging::log_config_info;
pub use metrics::MetricsRecorder;
pub use tracing::{init_tracing_with_logging, shutdown_tracing};

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging/tracing and return the tracer provider, which must be
/// kept alive and passed to [`shutdown_tracing`] before the process exits.
pub async fn init_observability(
    config: &ObservabilityConfig,
) -> Result<Option<opentelemetry_sdk::trace::SdkTracerProvider>> {
    let provider = init_tracing_with_logging(config).await?;

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        tracing_enabled = %config.enable_tracing,
        metrics_enabled = %config.enable_metrics,
        "observability initialized"
    );

    Ok(provider)
}
