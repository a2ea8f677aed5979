use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};

use contour_rs::cache::{pump_into_cache, ObjectCache, StaticObjectSource};
use contour_rs::config::{load_config_from_env, XdsServerTlsConfig};
use contour_rs::dag::DagBuilder;
use contour_rs::leader::{LeaderElectionGate, SingleProcessLease};
use contour_rs::snapshot::SnapshotEngine;
use contour_rs::status::{StatusSink, StatusWriter};
use contour_rs::workgroup::Workgroup;
use contour_rs::xds::caches::{
    ClusterCache, EndpointCache, ListenerCache, ResourceCache, RouteCache, RuntimeCache, SecretCache,
};
use contour_rs::xds::XdsServer;
use contour_rs::{ContourError, Result, APP_NAME, VERSION};

/// A status sink that logs every patch instead of writing to a real API
/// server. Swapped out for a `kube`-backed implementation is the one piece
/// of genuine Kubernetes integration this crate leaves to its embedder.
struct LoggingStatusSink;

#[async_trait::async_trait]
impl StatusSink for LoggingStatusSink {
    async fn patch_status(
        &self,
        obj: &contour_rs::domain::ObjectRef,
        patch: contour_rs::status::StatusPatch,
    ) -> Result<()> {
        info!(object = %obj, generation = patch.observed_generation, "status patch (no-op sink)");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_from_env()?;
    let observability_config = contour_rs::config::ObservabilityConfig::default();

    let _tracer_provider = contour_rs::observability::init_observability(&observability_config).await?;
    contour_rs::observability::log_config_info(&config);

    info!(app_name = APP_NAME, version = VERSION, "starting contour-rs control plane");

    let cache = Arc::new(ObjectCache::new(true));
    let snapshot_engine = Arc::new(SnapshotEngine::new(config.server.node_hash.clone()));

    let (status_tx, status_rx) = mpsc::channel(1024);

    let mut workgroup = Workgroup::new(Duration::from_secs(10));
    let stop = workgroup.stop_token();

    // Ingestion: a production deployment swaps `StaticObjectSource` for a
    // `kube`-backed informer source; this crate never talks to the API
    // server itself (section 4.A ambient seam).
    let ingestion_cache = cache.clone();
    workgroup.spawn("ingestion", async move {
        pump_into_cache(StaticObjectSource::new(Vec::new()), ingestion_cache).await;
        Ok(())
    });

    // DAG builder loop: rebuilds on every coalesced cache change, refreshes
    // the six resource caches, publishes a new snapshot, and forwards the
    // build's status facts to the status writer (section 4.B, 4.D).
    let builder_cache = cache.clone();
    let builder_config = config.clone();
    let builder_snapshot = snapshot_engine.clone();
    let builder_listener = ListenerCache::new(config.clone());
    let builder_route = RouteCache::default();
    let builder_cluster = ClusterCache::default();
    let builder_endpoint = EndpointCache::default();
    let builder_secret = SecretCache::default();
    let builder_runtime = RuntimeCache::new(config.clone());
    let builder_stop = stop.clone();
    workgroup.spawn("dag-builder", async move {
        let mut trigger = builder_cache.subscribe();
        loop {
            tokio::select! {
                _ = builder_stop.cancelled() => return Ok(()),
                result = trigger.changed() => {
                    if result.is_err() {
                        return Ok(());
                    }
                }
            }
            trigger.mark_seen();

            let (dag, facts) = DagBuilder::new(&builder_cache, &builder_config).build();

            if !contour_rs::snapshot::referentially_closed(&dag) {
                error!("DAG build produced a snapshot that is not referentially closed, skipping publish");
                continue;
            }

            for cache_ref in [
                &builder_listener as &dyn ResourceCache,
                &builder_route,
                &builder_cluster,
                &builder_endpoint,
                &builder_secret,
                &builder_runtime,
            ] {
                cache_ref.on_change(&dag);
            }

            builder_snapshot.publish(
                &builder_listener,
                &builder_route,
                &builder_cluster,
                &builder_endpoint,
                &builder_secret,
                &builder_runtime,
            );

            for fact in facts {
                let _ = status_tx.send(fact).await;
            }
        }
    });

    // Leader election: gates the status writer so only the elected replica
    // patches `/status` (section 4.H). A single-process deployment always
    // wins immediately.
    let leader_gate = LeaderElectionGate::new(SingleProcessLease, Duration::from_secs(10));
    let is_leader = leader_gate.subscribe();
    let leader_stop = stop.clone();
    workgroup.spawn("leader-election", async move { leader_gate.run(leader_stop).await });

    let status_writer = StatusWriter::new(Arc::new(LoggingStatusSink), Duration::from_millis(250));
    let status_stop = stop.clone();
    workgroup.spawn("status-writer", async move {
        status_writer.run(status_rx, is_leader, status_stop).await;
        Ok(())
    });

    let xds_tls = XdsServerTlsConfig::from_env()?;
    let xds_server = XdsServer::new(&config.server, xds_tls, snapshot_engine.clone())?;
    let xds_stop = stop.clone();
    workgroup.spawn("xds-server", async move { xds_server.serve(xds_stop.cancelled_owned()).await });

    let admin_config = config.server.clone();
    let admin_cache = cache.clone();
    let admin_snapshot = snapshot_engine.clone();
    let admin_stop = stop.clone();
    workgroup.spawn("admin", async move {
        contour_rs::admin::serve(&admin_config, admin_cache, admin_snapshot, admin_stop.cancelled_owned()).await
    });

    workgroup.spawn("signal-handler", async move {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ContourError::fatal_with_source("failed to install signal handler", Box::new(e)))?;
        info!("shutdown signal received");
        Ok(())
    });

    let outcome = workgroup.run().await;
    if let Err(err) = &outcome {
        error!(error = %err, "contour-rs exiting with error");
    }
    outcome
}
