//! The six typed discovery services (CDS/EDS/LDS/RDS/SDS/RTDS). Each is a
//! thin `tonic` service wrapper over [`super::sotw::run_typed_stream`];
//! only the SoTW streaming RPC is implemented per type, since section 4.E
//! scopes this crate to state-of-the-world xDS — delta and unary fetch are
//! declined with `Status::unimplemented` rather than silently accepted and
//! ignored.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryService;
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryService;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryService;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryService;
use envoy_types::pb::envoy::service::runtime::v3::runtime_discovery_service_server::RuntimeDiscoveryService;
use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryService;

use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};

use crate::snapshot::SnapshotEngine;
use crate::xds::resources::{
    CLUSTER_LOAD_ASSIGNMENT_TYPE_URL, CLUSTER_TYPE_URL, LISTENER_TYPE_URL, ROUTE_CONFIGURATION_TYPE_URL,
    RUNTIME_TYPE_URL, SECRET_TYPE_URL,
};

use super::sotw::{run_typed_stream, ResponseStream};

fn delta_unimplemented<T>(rpc: &str) -> Result<Response<T>, Status> {
    Err(Status::unimplemented(format!("{rpc} does not support incremental (delta) xDS")))
}

fn fetch_unimplemented(rpc: &str) -> Result<Response<DiscoveryResponse>, Status> {
    Err(Status::unimplemented(format!("{rpc} does not support unary fetch, use the streaming RPC")))
}

macro_rules! typed_service {
    ($service:ident, $trait:ident, $stream_method:ident, $stream_assoc:ident, $delta_method:ident, $delta_assoc:ident, $fetch_method:ident, $type_url:expr) => {
        pub struct $service {
            engine: Arc<SnapshotEngine>,
        }

        impl $service {
            pub fn new(engine: Arc<SnapshotEngine>) -> Self {
                Self { engine }
            }
        }

        #[tonic::async_trait]
        impl $trait for $service {
            type $stream_assoc = ResponseStream;
            type $delta_assoc = tokio_stream::wrappers::ReceiverStream<Result<DeltaDiscoveryResponse, Status>>;

            async fn $stream_method(
                &self,
                request: Request<tonic::Streaming<DiscoveryRequest>>,
            ) -> Result<Response<Self::$stream_assoc>, Status> {
                let stream = run_typed_stream($type_url, self.engine.clone(), request.into_inner());
                Ok(Response::new(stream))
            }

            async fn $delta_method(
                &self,
                _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
            ) -> Result<Response<Self::$delta_assoc>, Status> {
                delta_unimplemented(stringify!($delta_method))
            }

            async fn $fetch_method(
                &self,
                _request: Request<DiscoveryRequest>,
            ) -> Result<Response<DiscoveryResponse>, Status> {
                fetch_unimplemented(stringify!($fetch_method))
            }
        }
    };
}

typed_service!(
    ClusterService,
    ClusterDiscoveryService,
    stream_clusters,
    StreamClustersStream,
    delta_clusters,
    DeltaClustersStream,
    fetch_clusters,
    CLUSTER_TYPE_URL
);

typed_service!(
    EndpointService,
    EndpointDiscoveryService,
    stream_endpoints,
    StreamEndpointsStream,
    delta_endpoints,
    DeltaEndpointsStream,
    fetch_endpoints,
    CLUSTER_LOAD_ASSIGNMENT_TYPE_URL
);

typed_service!(
    ListenerService,
    ListenerDiscoveryService,
    stream_listeners,
    StreamListenersStream,
    delta_listeners,
    DeltaListenersStream,
    fetch_listeners,
    LISTENER_TYPE_URL
);

typed_service!(
    RouteService,
    RouteDiscoveryService,
    stream_routes,
    StreamRoutesStream,
    delta_routes,
    DeltaRoutesStream,
    fetch_routes,
    ROUTE_CONFIGURATION_TYPE_URL
);

typed_service!(
    SecretService,
    SecretDiscoveryService,
    stream_secrets,
    StreamSecretsStream,
    delta_secrets,
    DeltaSecretsStream,
    fetch_secrets,
    SECRET_TYPE_URL
);

pub struct RuntimeService {
    engine: Arc<SnapshotEngine>,
}

impl RuntimeService {
    pub fn new(engine: Arc<SnapshotEngine>) -> Self {
        Self { engine }
    }
}

#[tonic::async_trait]
impl RuntimeDiscoveryService for RuntimeService {
    type StreamRuntimeStream = ResponseStream;
    type DeltaRuntimeStream = tokio_stream::wrappers::ReceiverStream<Result<DeltaDiscoveryResponse, Status>>;

    async fn stream_runtime(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamRuntimeStream>, Status> {
        let stream = run_typed_stream(RUNTIME_TYPE_URL, self.engine.clone(), request.into_inner());
        Ok(Response::new(stream))
    }

    async fn delta_runtime(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaRuntimeStream>, Status> {
        delta_unimplemented("delta_runtime")
    }
}
