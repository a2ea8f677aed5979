//! Crate-wide error type.
//!
//! `ContourError` has one variant per abstract error kind in the control-plane
//! error taxonomy. Local kinds (`Admission`, `Resolution`, `Conflict`) are
//! surfaced as status conditions by the DAG builder and never stop the
//! control loop; `Fatal` is the only variant that should reach `main` and
//! terminate the process.

mod tls;

pub use tls::TlsError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ContourError>;

#[derive(thiserror::Error, Debug)]
pub enum ContourError {
    /// Malformed config file or unknown option. Fatal at startup.
    #[error("configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A watched object is syntactically or semantically invalid. Local.
    #[error("admission error on {kind}/{namespace}/{name}: {reason}")]
    Admission { kind: String, namespace: String, name: String, reason: String },

    /// Reference to a missing Service/Secret/ExtensionService. Local.
    #[error("resolution error: {reference} not found (referenced by {referrer})")]
    Resolution { reference: String, referrer: String },

    /// Duplicate hostname, include cycle, TLS delegation violation. Local.
    #[error("conflict error: {reason} ({participants:?})")]
    Conflict { reason: String, participants: Vec<String> },

    /// Retryable Kubernetes API failure. Never surfaced to the user.
    #[error("transient API error during {operation}: {message}")]
    TransientApi { operation: String, message: String },

    /// Envoy gRPC stream failure. The stream is dropped; Envoy reconnects.
    #[error("xDS stream error on {stream_id}: {message}")]
    Stream { stream_id: String, message: String },

    /// Leader lease lost or an internal invariant was violated. Exits the process.
    #[error("fatal error: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// TLS material for the xDS server's downstream listener is misconfigured.
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("io error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    #[error("transport error: {0}")]
    Transport(String),
}

impl ContourError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    pub fn admission<K: Into<String>, N: Into<String>, M: Into<String>, R: Into<String>>(
        kind: K,
        namespace: N,
        name: M,
        reason: R,
    ) -> Self {
        Self::Admission {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn resolution<R: Into<String>, F: Into<String>>(reference: R, referrer: F) -> Self {
        Self::Resolution { reference: reference.into(), referrer: referrer.into() }
    }

    pub fn conflict<R: Into<String>>(reason: R, participants: Vec<String>) -> Self {
        Self::Conflict { reason: reason.into(), participants }
    }

    pub fn transient_api<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::TransientApi { operation: operation.into(), message: message.into() }
    }

    pub fn stream<S: Into<String>, M: Into<String>>(stream_id: S, message: M) -> Self {
        Self::Stream { stream_id: stream_id.into(), message: message.into() }
    }

    pub fn fatal<S: Into<String>>(message: S) -> Self {
        Self::Fatal { message: message.into(), source: None }
    }

    pub fn fatal_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Fatal { message: message.into(), source: Some(source) }
    }

    /// Local errors (Admission/Resolution/Conflict) never stop the control loop.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Admission { .. } | Self::Resolution { .. } | Self::Conflict { .. })
    }
}

impl From<std::io::Error> for ContourError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source, context: "io".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_errors_are_flagged_local() {
        assert!(ContourError::admission("HTTPProxy", "default", "x", "bad").is_local());
        assert!(ContourError::resolution("default/missing:80", "default/x").is_local());
        assert!(ContourError::conflict("DuplicateHostname", vec!["a".into()]).is_local());
        assert!(!ContourError::fatal("lease lost").is_local());
        assert!(!ContourError::transient_api("list", "timeout").is_local());
    }

    #[test]
    fn display_messages_are_human_readable() {
        let e = ContourError::resolution("default/missing:80", "default/x");
        assert!(e.to_string().contains("not found"));
    }
}
