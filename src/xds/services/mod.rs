//! The xDS gRPC services themselves: the generic SoTW stream state machine
//! plus one thin `tonic` wrapper per discovery type.

mod aggregated;
mod sotw;
mod typed;

pub use aggregated::AdsService;
pub use typed::{ClusterService, EndpointService, ListenerService, RouteService, RuntimeService, SecretService};
