//! Small shared helpers used across the cache, DAG, and xDS layers.

pub mod certificates;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Names must start with a letter or underscore, followed by letters,
/// numbers, underscores, or hyphens. Applied to generated Envoy resource
/// names (cluster/route/listener names derived from namespace/name pairs).
pub static VALID_NAME_REGEX: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_-]*$").unwrap());

pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Correlation id threaded through one DAG build / xDS push for log correlation.
#[derive(Debug, Clone)]
pub struct CorrelationId(String);

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationId {
    pub fn new() -> Self {
        Self(generate_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reported by the admin/debug endpoint's `/healthz`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    pub details: HashMap<String, String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthCheck {
    pub fn healthy(component: &str) -> Self {
        Self {
            status: HealthStatus::Healthy,
            component: component.to_string(),
            details: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn degraded(component: &str, details: HashMap<String, String>) -> Self {
        Self { status: HealthStatus::Degraded, component: component.to_string(), details, timestamp: chrono::Utc::now() }
    }

    pub fn unhealthy(component: &str, details: HashMap<String, String>) -> Self {
        Self { status: HealthStatus::Unhealthy, component: component.to_string(), details, timestamp: chrono::Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_name_regex_rejects_leading_digit() {
        assert!(!VALID_NAME_REGEX.is_match("1bad"));
        assert!(VALID_NAME_REGEX.is_match("default-echo-80"));
    }

    #[test]
    fn correlation_id_is_unique() {
        assert_ne!(CorrelationId::new().as_str(), CorrelationId::new().as_str());
    }
}
