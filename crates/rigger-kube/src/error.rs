//! Errors from release storage and the cluster

use rigger_core::Interruption;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KubeError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    #[error("Kubernetes API call failed: {0}")]
    Api(#[from] kube::Error),

    /// Kubeconfig could not be read or used
    #[error("kubeconfig error: {0}")]
    Config(String),

    #[error("release '{name}' has no revisions in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    #[error("release '{name}' is already recorded in namespace '{namespace}'")]
    ReleaseAlreadyExists { name: String, namespace: String },

    /// The latest revision is still pending
    #[error("release '{name}' is busy, its latest revision is {status}")]
    OperationInProgress { name: String, status: String },

    #[error("release storage: {0}")]
    Storage(String),

    #[error("could not encode or decode a revision: {0}")]
    Serialization(String),

    #[error("could not compress or decompress a revision: {0}")]
    Compression(String),

    #[error("rendering failed: {0}")]
    Template(String),

    /// Chart cannot be released
    #[error("chart is not releasable: {0}")]
    Chart(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("manifest is not valid: {0}")]
    InvalidManifest(String),

    /// Some resources were rejected by the cluster
    #[error("failed to apply resources: {0}")]
    ApplyFailed(String),

    #[error("interrupted: {0}")]
    Interrupted(#[from] Interruption),
}

impl From<serde_json::Error> for KubeError {
    fn from(err: serde_json::Error) -> Self {
        KubeError::Serialization(err.to_string())
    }
}

impl From<rigger_core::CoreError> for KubeError {
    fn from(err: rigger_core::CoreError) -> Self {
        KubeError::Chart(err.to_string())
    }
}

impl From<rigger_engine::EngineError> for KubeError {
    fn from(err: rigger_engine::EngineError) -> Self {
        KubeError::Template(err.to_string())
    }
}
