//! Binds the six typed discovery services and the aggregated service onto
//! one `tonic` gRPC server (section 4.E). TLS on this listener is optional
//! downstream mTLS for the xDS connection itself, configured independently
//! of anything the DAG attaches to Envoy's own listeners.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tracing::info;

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryServiceServer;
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryServiceServer;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryServiceServer;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryServiceServer;
use envoy_types::pb::envoy::service::runtime::v3::runtime_discovery_service_server::RuntimeDiscoveryServiceServer;
use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryServiceServer;

use crate::config::{ServerConfig, XdsServerTlsConfig};
use crate::errors::ContourError;
use crate::observability::GrpcTracingLayer;
use crate::snapshot::SnapshotEngine;
use crate::Result;

use super::services::{
    AdsService, ClusterService, EndpointService, ListenerService, RouteService, RuntimeService, SecretService,
};

/// Owns the gRPC listener for the xDS server. Constructed once at startup
/// and handed to the workgroup; `serve` runs until `shutdown` resolves.
pub struct XdsServer {
    addr: SocketAddr,
    tls: Option<XdsServerTlsConfig>,
    engine: Arc<SnapshotEngine>,
}

impl XdsServer {
    pub fn new(config: &ServerConfig, tls: Option<XdsServerTlsConfig>, engine: Arc<SnapshotEngine>) -> Result<Self> {
        let addr = format!("{}:{}", config.xds_address, config.xds_port)
            .parse()
            .map_err(|e| ContourError::config(format!("invalid xDS bind address: {e}")))?;
        Ok(Self { addr, tls, engine })
    }

    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let mut builder = Server::builder();
        if let Some(tls_config) = load_server_tls_config(self.tls.as_ref())? {
            builder = builder
                .tls_config(tls_config)
                .map_err(|e| ContourError::Transport(format!("failed to apply xDS TLS configuration: {e}")))?;
        }

        let engine = self.engine;

        info!(address = %self.addr, node_hash = %engine.node_hash(), "xDS server listening");

        builder
            .layer(GrpcTracingLayer::new())
            .add_service(AggregatedDiscoveryServiceServer::new(AdsService::new(engine.clone())))
            .add_service(ClusterDiscoveryServiceServer::new(ClusterService::new(engine.clone())))
            .add_service(EndpointDiscoveryServiceServer::new(EndpointService::new(engine.clone())))
            .add_service(ListenerDiscoveryServiceServer::new(ListenerService::new(engine.clone())))
            .add_service(RouteDiscoveryServiceServer::new(RouteService::new(engine.clone())))
            .add_service(SecretDiscoveryServiceServer::new(SecretService::new(engine.clone())))
            .add_service(RuntimeDiscoveryServiceServer::new(RuntimeService::new(engine)))
            .serve_with_shutdown(self.addr, shutdown)
            .await
            .map_err(|e| ContourError::Transport(format!("xDS server failed: {e}")))?;

        info!("xDS server shut down");
        Ok(())
    }
}

fn load_server_tls_config(tls: Option<&XdsServerTlsConfig>) -> Result<Option<ServerTlsConfig>> {
    let tls = match tls {
        Some(tls) => tls,
        None => return Ok(None),
    };

    let cert_bytes = std::fs::read(&tls.cert_path).map_err(|e| {
        ContourError::config(format!("failed to read xDS TLS certificate at {}: {e}", tls.cert_path.display()))
    })?;
    let key_bytes = std::fs::read(&tls.key_path).map_err(|e| {
        ContourError::config(format!("failed to read xDS TLS private key at {}: {e}", tls.key_path.display()))
    })?;

    let identity = Identity::from_pem(cert_bytes, key_bytes);
    let mut server_tls_config = ServerTlsConfig::new().identity(identity);

    match &tls.client_ca_path {
        Some(ca_path) => {
            let ca_bytes = std::fs::read(ca_path).map_err(|e| {
                ContourError::config(format!("failed to read xDS client CA at {}: {e}", ca_path.display()))
            })?;
            server_tls_config = server_tls_config.client_ca_root(Certificate::from_pem(ca_bytes));
            if !tls.require_client_cert {
                server_tls_config = server_tls_config.client_auth_optional(true);
            }
        }
        None if tls.require_client_cert => {
            return Err(ContourError::config(
                "xDS client certificate verification is enabled but no client CA path is configured",
            ));
        }
        None => {}
    }

    Ok(Some(server_tls_config))
}
