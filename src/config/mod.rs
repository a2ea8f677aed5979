//! Configuration loading.
//!
//! Configuration is loaded in the following order (later sources override
//! earlier ones): built-in defaults, an optional TOML/YAML file, then
//! environment variables prefixed `CONTOUR_`. Loading itself is ambient
//! infrastructure; it does not implement CLI flag parsing (out of scope —
//! a thin `clap` entry point in `main.rs` only resolves the config-file path).

pub mod settings;
pub mod tls;

pub use settings::{
    AccessLogConfig, AccessLogFormat, AppConfig, EnvoyListenerConfig, EnvoyListenersConfig,
    IngressConfig, LeaderElectionConfig, NamespacedName, ObservabilityConfig,
    RateLimitServiceConfig, ServerConfig, TimeoutsConfig, TlsDefaultsConfig, TlsProtocolVersion,
};
pub use tls::XdsServerTlsConfig;

use crate::errors::{ContourError, Result};
use config::{Config, Environment, File};
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(config_path: Option<P>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    builder = builder.add_source(Config::try_from(&AppConfig::default()).map_err(|e| {
        ContourError::config_with_source("failed to serialize default configuration", Box::new(e))
    })?);

    if let Some(path) = config_path {
        let path = path.as_ref();
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ContourError::config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("CONTOUR").separator("_").try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| ContourError::config_with_source("failed to build configuration", Box::new(e)))?;

    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ContourError::config_with_source("failed to deserialize configuration", Box::new(e))
    })?;

    app_config.validate_all()?;

    Ok(app_config)
}

pub fn load_config_from_env() -> Result<AppConfig> {
    load_config::<&str>(None)
}

pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    load_config(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_defaults_with_no_file() {
        let cfg = load_config_from_env().unwrap();
        assert_eq!(cfg.server.xds_port, 8001);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let result = load_config_from_file("/nonexistent/contour.yaml");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }
}
