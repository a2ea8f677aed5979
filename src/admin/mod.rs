//! The admin/debug endpoint (section 4.G: one of the long-lived workers
//! the workgroup owns). Scoped to liveness/readiness probes and a handful
//! of read-only debug views over the snapshot engine and object cache —
//! there is no mutation surface here, and no metrics-export endpoint
//! (explicitly out of scope, section 1); this is the ambient
//! admin/debug surface every long-running control-plane process carries,
//! built the way the teacher's API server is (`axum` + `tower-http`
//! tracing layer).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cache::ObjectCache;
use crate::config::ServerConfig;
use crate::errors::ContourError;
use crate::snapshot::SnapshotEngine;
use crate::Result;

#[derive(Clone)]
struct AdminState {
    cache: Arc<ObjectCache>,
    snapshot: Arc<SnapshotEngine>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct DebugSnapshot {
    node_hash: String,
    version: String,
    resource_counts: std::collections::BTreeMap<&'static str, usize>,
}

#[derive(Serialize)]
struct DebugCache {
    object_count: usize,
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness requires at least one snapshot to have been published; an
/// empty snapshot (the zero value before the first DAG build completes)
/// is reported not-ready so Envoy/load balancers don't route to a
/// control plane that has nothing to serve yet.
async fn readyz(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.snapshot.current();
    if snapshot.version.is_empty() {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse { status: "not-ready" }))
    } else {
        (axum::http::StatusCode::OK, Json(HealthResponse { status: "ok" }))
    }
}

async fn debug_snapshot(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.snapshot.current();
    let resource_counts =
        snapshot.resources.iter().map(|(type_url, resources)| (*type_url, resources.len())).collect();
    Json(DebugSnapshot {
        node_hash: state.snapshot.node_hash().to_string(),
        version: snapshot.version.clone(),
        resource_counts,
    })
}

async fn debug_cache(State(state): State<AdminState>) -> impl IntoResponse {
    Json(DebugCache { object_count: state.cache.len() })
}

fn build_router(cache: Arc<ObjectCache>, snapshot: Arc<SnapshotEngine>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/debug/snapshot", get(debug_snapshot))
        .route("/debug/cache", get(debug_cache))
        .layer(TraceLayer::new_for_http())
        .with_state(AdminState { cache, snapshot })
}

/// Serves the admin endpoint until `shutdown` resolves. One of the workers
/// the workgroup (section 4.G) owns the lifetime of.
pub async fn serve(
    config: &ServerConfig,
    cache: Arc<ObjectCache>,
    snapshot: Arc<SnapshotEngine>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.admin_address, config.admin_port)
        .parse()
        .map_err(|e| ContourError::config(format!("invalid admin bind address: {e}")))?;

    let router = build_router(cache, snapshot);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ContourError::Transport(format!("failed to bind admin endpoint: {e}")))?;

    info!(address = %addr, "admin endpoint listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ContourError::Transport(format!("admin endpoint error: {e}")))?;

    info!("admin endpoint shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Dag;
    use crate::xds::caches::{ClusterCache, EndpointCache, ListenerCache, ResourceCache, RouteCache, RuntimeCache, SecretCache};
    use crate::config::AppConfig;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_reports_ok() {
        let cache = Arc::new(ObjectCache::new(false));
        let snapshot = Arc::new(SnapshotEngine::new("contour"));
        let router = build_router(cache, snapshot);

        let response = router
            .oneshot(axum::http::Request::builder().uri("/healthz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_is_unavailable_before_first_snapshot() {
        let cache = Arc::new(ObjectCache::new(false));
        let snapshot = Arc::new(SnapshotEngine::new("contour"));
        let router = build_router(cache, snapshot);

        let response = router
            .oneshot(axum::http::Request::builder().uri("/readyz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn readyz_is_ok_after_a_published_snapshot() {
        let cache = Arc::new(ObjectCache::new(false));
        let snapshot = Arc::new(SnapshotEngine::new("contour"));

        let dag = Dag::default();
        let listener = ListenerCache::new(AppConfig::default());
        let route = RouteCache::default();
        let cluster = ClusterCache::default();
        let endpoint = EndpointCache::default();
        let secret = SecretCache::default();
        let runtime = RuntimeCache::new(AppConfig::default());
        for c in [&listener as &dyn ResourceCache, &route, &cluster, &endpoint, &secret, &runtime] {
            c.on_change(&dag);
        }
        snapshot.publish(&listener, &route, &cluster, &endpoint, &secret, &runtime);

        let router = build_router(cache, snapshot);
        let response = router
            .oneshot(axum::http::Request::builder().uri("/readyz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
