//! The xDS streaming server (section 4.E): Envoy's state-of-the-world
//! discovery protocol over gRPC, serving whatever [`crate::snapshot::SnapshotEngine`]
//! currently holds. Resource *construction* lives in the per-type builder
//! modules below (`cluster`, `endpoint`, `listener`, `route`, `secret`,
//! `runtime`) and the per-type caches in [`caches`]; this module only owns
//! the network surface.

pub mod caches;
pub mod cluster;
pub mod endpoint;
pub mod filters;
pub mod listener;
pub(crate) mod resources;
pub mod route;
pub mod runtime;
pub mod secret;
mod server;
pub mod services;

pub use server::XdsServer;
