//! Error types for pod-doctor.
//!
//! Only [`DoctorError`] is fatal. Cluster read failures and reasoning service
//! failures are recovered locally by the aggregator and the escalator.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Fatal configuration and safety errors. Any of these aborts the run before
/// data collection starts.
#[derive(Debug, Error)]
pub enum DoctorError {
    /// Config file could not be read
    #[error("Failed to read config file '{}': {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::config::DoctorConfig`]
    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A config value is missing or out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required selector label was empty
    #[error("Missing required label '{0}'")]
    MissingLabel(&'static str),

    /// Escalation is enabled but no credentials were provided
    #[error("Missing credentials: {0} is not set")]
    MissingCredentials(&'static str),

    /// Kubeconfig file does not exist
    #[error("Kubeconfig file not found at '{}'", path.display())]
    KubeconfigMissing { path: PathBuf },

    /// Kubeconfig could not be loaded
    #[error("Failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// Kubeconfig has no current-context
    #[error("No active context found in kubeconfig")]
    NoActiveContext,

    /// current-context names a context that is not defined
    #[error("Context '{0}' is not defined in kubeconfig")]
    UnknownContext(String),

    /// Safety gate: the active context targets a different cluster
    #[error(
        "Configured to run only against the '{expected}' cluster, but the current context targets '{actual}'. Aborting."
    )]
    WrongCluster { expected: String, actual: String },

    /// Kubernetes client construction failed
    #[error("Failed to create Kubernetes client: {0}")]
    Client(#[from] kube::Error),

    /// Pods matching the selector could not be listed
    #[error("Failed to list pods with selector '{selector}': {source}")]
    Selection {
        selector: String,
        #[source]
        source: ClusterError,
    },
}

/// Errors from a single read against the cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The requested object does not exist
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// The read did not finish in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl ClusterError {
    /// Map a kube error, turning 404 responses into [`ClusterError::NotFound`].
    pub fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => Self::NotFound {
                kind,
                name: name.to_string(),
            },
            _ => Self::Api(err),
        }
    }
}

/// Errors from the reasoning service.
#[derive(Debug, Error)]
pub enum ReasonerError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limited by the service
    #[error("Rate limited by reasoning service")]
    RateLimited,

    /// Non-success response
    #[error("Reasoning service error ({status}): {message}")]
    Api { status: u16, message: String },

    /// No answer within the configured timeout
    #[error("Reasoning service timed out after {0:?}")]
    Timeout(Duration),

    /// Response body could not be interpreted
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ReasonerError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode() && !e.is_builder(),
            Self::RateLimited | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Malformed(_) => false,
        }
    }
}
