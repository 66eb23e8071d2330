//! Error types for the Archer operator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error while reading or persisting a Service
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Transport-level failure talking to the Archer API
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The Archer API answered with a non-success status
    #[error("Archer API returned {status}: {message}")]
    BrokerError { status: u16, message: String },

    /// Keystone refused to issue a token or answered with something unusable
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// The Service annotations or spec cannot be turned into an endpoint service
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// More than one endpoint service carries the correlation tags of a Service
    #[error("multiple endpoint services found for service {namespace}/{name}")]
    AmbiguousRemoteState { namespace: String, name: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Binding or serving the metrics and probe listeners
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether retrying soon has a chance of succeeding.
    ///
    /// Validation and ambiguity errors only clear once someone changes the
    /// Service or the broker state, so they are requeued on the slow path.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_) | Error::HttpError(_) | Error::IoError(_) | Error::AuthError(_) => {
                true
            }
            Error::BrokerError { status, .. } => *status >= 500 || *status == 409 || *status == 429,
            Error::ValidationError(_)
            | Error::AmbiguousRemoteState { .. }
            | Error::ConfigError(_)
            | Error::SerializationError(_) => false,
        }
    }

    /// Short label used for the error metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::HttpError(_) => "http",
            Error::BrokerError { .. } => "broker",
            Error::AuthError(_) => "auth",
            Error::ValidationError(_) => "validation",
            Error::AmbiguousRemoteState { .. } => "ambiguous",
            Error::ConfigError(_) => "config",
            Error::IoError(_) => "io",
            Error::SerializationError(_) => "serialization",
        }
    }
}
