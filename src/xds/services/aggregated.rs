//! The Aggregated Discovery Service (ADS): one stream multiplexing all six
//! resource types, the transport most Envoys actually use. Delta ADS is
//! declined the same way the typed delta RPCs are (section 4.E is SoTW-only).

use std::sync::Arc;

use tonic::{Request, Response, Status};

use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryService;
use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest,
};

use crate::snapshot::SnapshotEngine;

use super::sotw::{run_aggregated_stream, ResponseStream};

pub struct AdsService {
    engine: Arc<SnapshotEngine>,
}

impl AdsService {
    pub fn new(engine: Arc<SnapshotEngine>) -> Self {
        Self { engine }
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AdsService {
    type StreamAggregatedResourcesStream = ResponseStream;
    type DeltaAggregatedResourcesStream =
        tokio_stream::wrappers::ReceiverStream<Result<DeltaDiscoveryResponse, Status>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        let stream = run_aggregated_stream(self.engine.clone(), request.into_inner());
        Ok(Response::new(stream))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented("delta ADS is not supported, use StreamAggregatedResources"))
    }
}
