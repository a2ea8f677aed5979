//! # contour-rs
//!
//! An Envoy xDS control plane that watches a set of Kubernetes-shaped
//! ingress objects, folds them into a single dependency graph, and streams
//! the resulting CDS/RDS/LDS/EDS/SDS/RTDS resources to connected Envoy
//! proxies over the Aggregated Discovery Service.
//!
//! ## Core components
//!
//! - **Object cache** (`cache`): admission-filtered store of watched objects
//! - **DAG builder** (`dag`): deterministic fold of the cache into a graph
//! - **Resource caches** (`xds`): DAG → Envoy xDS resource translation
//! - **Snapshot engine** (`snapshot`): atomic, referentially-closed publication
//! - **xDS streaming server** (`xds::services`): SoTW ADS/CDS/RDS/LDS/EDS/SDS/RTDS
//! - **Status writer** (`status`): batched status-condition flush
//! - **Workgroup** (`workgroup`): task supervision and shutdown
//! - **Leader election** (`leader`): active/standby gate for status writes

pub mod admin;
pub mod cache;
pub mod config;
pub mod dag;
pub mod domain;
pub mod errors;
pub mod leader;
pub mod observability;
pub mod snapshot;
pub mod status;
pub mod utils;
pub mod workgroup;
pub mod xds;

pub use config::AppConfig;
pub use errors::{ContourError, Result};

/// Application version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml.
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_looks_like_semver() {
        let components: Vec<_> = VERSION.split('.').collect();
        assert!(components.len() >= 3, "version should follow semver: {VERSION}");
        assert!(components.iter().all(|part| !part.is_empty()));
        assert_eq!(APP_NAME, "contour-rs");
    }
}
