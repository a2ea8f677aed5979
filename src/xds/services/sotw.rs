//! The per-stream state machine from section 4.E: Opened → Waiting →
//! Sending → Waiting-ack → Closed. One instance of this loop backs every
//! typed discovery service (CDS/EDS/LDS/RDS/SDS/RTDS) and a variant backs
//! the aggregated stream, which multiplexes all six over one connection.
//!
//! The loop never blocks on a slow client beyond the channel buffer (the
//! gRPC transport itself absorbs backpressure, section 5 "Timeouts": "xDS
//! sends are non-blocking at the application layer") and suspends on
//! whichever of {new snapshot, new request, shutdown} fires first —
//! exactly the `tokio::select!` shape section 5 calls out as replacing
//! "busy loops".

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::Status;
use tracing::{debug, info, warn};

use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};

use crate::observability::metrics::MetricsRecorder;
use crate::snapshot::{Snapshot, SnapshotEngine};
use crate::xds::resources::short_name;

pub type ResponseStream = ReceiverStream<Result<DiscoveryResponse, Status>>;

/// Per-type-url subscription state the state machine tracks across the
/// life of one stream: the resource-name hints the client last sent (empty
/// means "all resources" per section 4.E) and the version last sent, which
/// starts `None` — "a value below any real version, which guarantees an
/// immediate first response".
#[derive(Default, Clone)]
struct Subscription {
    resource_names: Vec<String>,
    last_sent_version: Option<String>,
}

fn resources_for(snapshot: &Snapshot, type_url: &str, sub: &Subscription) -> Vec<envoy_types::pb::google::protobuf::Any> {
    let all = snapshot.resources_for(type_url);
    if sub.resource_names.is_empty() {
        all.into_iter().map(|r| r.resource).collect()
    } else {
        let wanted: std::collections::HashSet<&str> = sub.resource_names.iter().map(String::as_str).collect();
        all.into_iter().filter(|r| wanted.contains(r.name.as_str())).map(|r| r.resource).collect()
    }
}

fn build_response(type_url: &str, snapshot: &Snapshot, sub: &Subscription) -> DiscoveryResponse {
    let resources = resources_for(snapshot, type_url, sub);
    DiscoveryResponse {
        version_info: snapshot.version.clone(),
        resources,
        type_url: type_url.to_string(),
        nonce: snapshot.version.clone(),
        ..Default::default()
    }
}

/// True when `request` is an ACK or NACK of the version we last sent for
/// this type (section 4.E "Waiting-ack"): it echoes our nonce back as
/// `response_nonce`. A NACK additionally carries `error_detail`; either
/// way no response is owed until the next snapshot — unless the caller
/// also finds the resource-name hint list changed, in which case a
/// response is still owed immediately (section 4.E: a new request "updates
/// the resource-name hint list" is itself a case the stream must answer).
fn is_ack_or_nack(request: &DiscoveryRequest, sub: &Subscription) -> bool {
    match &sub.last_sent_version {
        Some(version) => !request.response_nonce.is_empty() && &request.response_nonce == version,
        None => false,
    }
}

fn log_nack(type_url: &str, request: &DiscoveryRequest) {
    if let Some(detail) = &request.error_detail {
        warn!(
            type_url = %type_url,
            nonce = %request.response_nonce,
            code = detail.code,
            message = %detail.message,
            "[NACK] Envoy rejected previous response"
        );
        MetricsRecorder::new().record_nack(type_url);
    }
}

/// Drives one single-type SoTW stream (CDS/EDS/LDS/RDS/SDS/RTDS).
pub fn run_typed_stream(
    type_url: &'static str,
    engine: Arc<SnapshotEngine>,
    mut in_stream: tonic::Streaming<DiscoveryRequest>,
) -> ResponseStream {
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let label = short_name(type_url);
        MetricsRecorder::new().record_stream(type_url, true);
        info!(stream = label, "xDS stream opened");

        let mut sub = Subscription::default();
        let mut updates = engine.subscribe();

        loop {
            tokio::select! {
                biased;

                request = in_stream.next() => {
                    match request {
                        Some(Ok(request)) => {
                            log_nack(type_url, &request);
                            let previous_names = sub.resource_names.clone();
                            if !request.resource_names.is_empty() {
                                sub.resource_names = request.resource_names.clone();
                            }
                            let hint_changed = sub.resource_names != previous_names;
                            if is_ack_or_nack(&request, &sub) && !hint_changed {
                                debug!(stream = label, version = %request.version_info, "ack/nack, nothing to send");
                                continue;
                            }
                            let snapshot = engine.current();
                            if !send(&tx, type_url, &snapshot, &mut sub).await {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(stream = label, error = %err, "xDS stream receive error");
                            let _ = tx.send(Err(err)).await;
                            break;
                        }
                        None => {
                            info!(stream = label, "xDS stream closed by peer");
                            break;
                        }
                    }
                }
                update = updates.recv() => {
                    match update {
                        Ok(snapshot) => {
                            if sub.last_sent_version.as_deref() != Some(snapshot.version.as_str())
                                && !send(&tx, type_url, &snapshot, &mut sub).await
                            {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(stream = label, skipped, "missed snapshot notifications, resending current");
                            let snapshot = engine.current();
                            if !send(&tx, type_url, &snapshot, &mut sub).await {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        MetricsRecorder::new().record_stream(type_url, false);
        info!(stream = label, "xDS stream closed");
    });

    ReceiverStream::new(rx)
}

async fn send(
    tx: &mpsc::Sender<Result<DiscoveryResponse, Status>>,
    type_url: &str,
    snapshot: &Arc<Snapshot>,
    sub: &mut Subscription,
) -> bool {
    let response = build_response(type_url, snapshot, sub);
    sub.last_sent_version = Some(snapshot.version.clone());
    MetricsRecorder::new().record_push(type_url);
    tx.send(Ok(response)).await.is_ok()
}

/// Drives the aggregated stream: one connection multiplexing all six
/// discovery types, each tracked independently (section 4.E: "Uses a
/// fixed node-hash... to allow any Envoy to connect" over the ADS
/// variant).
pub fn run_aggregated_stream(
    engine: Arc<SnapshotEngine>,
    mut in_stream: tonic::Streaming<DiscoveryRequest>,
) -> ResponseStream {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        MetricsRecorder::new().record_stream("ADS", true);
        info!("ADS stream opened");

        let mut subs: HashMap<String, Subscription> = HashMap::new();
        let mut updates = engine.subscribe();

        loop {
            tokio::select! {
                biased;

                request = in_stream.next() => {
                    match request {
                        Some(Ok(request)) => {
                            let type_url = request.type_url.clone();
                            let sub = subs.entry(type_url.clone()).or_default();
                            log_nack(&type_url, &request);
                            let previous_names = sub.resource_names.clone();
                            if !request.resource_names.is_empty() {
                                sub.resource_names = request.resource_names.clone();
                            }
                            let hint_changed = sub.resource_names != previous_names;
                            if is_ack_or_nack(&request, sub) && !hint_changed {
                                continue;
                            }
                            let snapshot = engine.current();
                            if !send(&tx, &type_url, &snapshot, sub).await {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "ADS stream receive error");
                            let _ = tx.send(Err(err)).await;
                            break;
                        }
                        None => {
                            info!("ADS stream closed by peer");
                            break;
                        }
                    }
                }
                update = updates.recv() => {
                    match update {
                        Ok(snapshot) => {
                            let type_urls: Vec<String> = subs.keys().cloned().collect();
                            for type_url in type_urls {
                                let sub = subs.get_mut(&type_url).expect("key just listed");
                                if sub.last_sent_version.as_deref() != Some(snapshot.version.as_str())
                                    && !send(&tx, &type_url, &snapshot, sub).await
                                {
                                    return;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "ADS stream missed snapshot notifications");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        MetricsRecorder::new().record_stream("ADS", false);
        info!("ADS stream closed");
    });

    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::dag::Dag;
    use crate::xds::caches::{
        ClusterCache, EndpointCache, ListenerCache, ResourceCache, RouteCache, RuntimeCache, SecretCache,
    };
    use crate::xds::resources::RUNTIME_TYPE_URL;

    fn published_engine() -> Arc<SnapshotEngine> {
        let engine = Arc::new(SnapshotEngine::new("contour"));
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
        engine.publish(&listener, &route, &cluster, &endpoint, &secret, &runtime);
        engine
    }

    #[test]
    fn empty_hint_list_means_all_resources() {
        let engine = published_engine();
        let snapshot = engine.current();
        let sub = Subscription::default();
        let resources = resources_for(&snapshot, RUNTIME_TYPE_URL, &sub);
        assert_eq!(resources.len(), 1);
    }

    #[test]
    fn nonempty_hint_list_filters_by_name() {
        let engine = published_engine();
        let snapshot = engine.current();
        let sub = Subscription { resource_names: vec!["nonexistent".to_string()], last_sent_version: None };
        let resources = resources_for(&snapshot, RUNTIME_TYPE_URL, &sub);
        assert!(resources.is_empty());
    }

    #[test]
    fn ack_is_detected_by_echoed_nonce() {
        let sub = Subscription { resource_names: vec![], last_sent_version: Some("v1".to_string()) };
        let request = DiscoveryRequest { response_nonce: "v1".to_string(), ..Default::default() };
        assert!(is_ack_or_nack(&request, &sub));
    }

    #[test]
    fn first_request_is_never_an_ack() {
        let sub = Subscription::default();
        let request = DiscoveryRequest::default();
        assert!(!is_ack_or_nack(&request, &sub));
    }
}
