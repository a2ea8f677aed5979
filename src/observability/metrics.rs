//! Ambient instrumentation via the `metrics` facade.
//!
//! The metrics *export endpoint* is explicitly out of scope for this crate;
//! what remains is the call-site instrumentation itself, so that an embedder
//! who installs a recorder (Prometheus, StatsD, whatever) gets real numbers
//! without this crate depending on any particular backend.

use metrics::{counter, gauge, histogram};

/// Thin wrapper so call sites read like a cohesive API instead of scattered
/// macro invocations; holds no state of its own (the `metrics` crate's
/// global recorder is the source of truth).
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Object cache size after a mutation, per kind.
    pub fn record_cache_size(&self, kind: &str, size: usize) {
        gauge!("contour_cache_objects", "kind" => kind.to_string()).set(size as f64);
    }

    /// One DAG build pass completed.
    pub fn record_build(&self, duration_seconds: f64, status_count: usize) {
        histogram!("contour_dag_build_duration_seconds").record(duration_seconds);
        counter!("contour_dag_builds_total").increment(1);
        gauge!("contour_dag_status_facts").set(status_count as f64);
    }

    /// A snapshot version was published.
    pub fn record_snapshot_publish(&self, version: &str) {
        counter!("contour_snapshots_total").increment(1);
        gauge!("contour_snapshot_version", "version" => version.to_string()).set(1.0);
    }

    /// An xDS stream opened or closed.
    pub fn record_stream(&self, type_url: &str, opened: bool) {
        let g = gauge!("contour_xds_active_streams", "type_url" => type_url.to_string());
        if opened {
            g.increment(1.0);
        } else {
            g.decrement(1.0);
        }
    }

    /// A DiscoveryResponse was sent on a stream.
    pub fn record_push(&self, type_url: &str) {
        counter!("contour_xds_pushes_total", "type_url" => type_url.to_string()).increment(1);
    }

    /// A DiscoveryRequest carried an error_detail (NACK).
    pub fn record_nack(&self, type_url: &str) {
        counter!("contour_xds_nacks_total", "type_url" => type_url.to_string()).increment(1);
    }

    /// A status patch was flushed to the API.
    pub fn record_status_flush(&self, kind: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("contour_status_flushes_total", "kind" => kind.to_string(), "status" => status)
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_methods_do_not_panic_without_an_installed_recorder() {
        let m = MetricsRecorder::new();
        m.record_cache_size("Service", 3);
        m.record_build(0.01, 2);
        m.record_snapshot_publish("v1");
        m.record_stream("cluster", true);
        m.record_stream("cluster", false);
        m.record_push("cluster");
        m.record_nack("cluster");
        m.record_status_flush("HTTPProxy", true);
    }
}
