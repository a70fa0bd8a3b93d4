//! Repository and chart location errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("no repository named '{name}' is configured")]
    RepositoryNotFound { name: String },

    #[error("'{url}' is not a usable repository URL: {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("repositories file is invalid: {message}")]
    InvalidConfig { message: String },

    #[error("repository answered {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("could not reach repository: {message}")]
    NetworkError { message: String },

    #[error("repository did not answer within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("no index.yaml at {url}")]
    IndexNotFound { url: String },

    #[error("index.yaml is malformed: {message}")]
    IndexParseError { message: String },

    #[error("chart '{name}' not found ({hint})")]
    ChartNotFound { name: String, hint: String },

    #[error("repository '{repo}' has no version {version} of chart '{name}'")]
    VersionNotFound {
        name: String,
        version: String,
        repo: String,
    },

    #[error("chart '{name}' has no published versions")]
    NoVersionsAvailable { name: String },

    #[error("no version of chart '{name}' satisfies '{constraint}' (available: {available})")]
    UnsatisfiableConstraint {
        name: String,
        constraint: String,
        available: String,
    },

    #[error("digest mismatch for {name}: index says {expected}, download is {actual}")]
    IntegrityCheckFailed {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Chart(#[from] rigger_core::CoreError),
}

pub type Result<T> = std::result::Result<T, RepoError>;

/// Timeout applied to every repository request
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 30;

impl From<reqwest::Error> for RepoError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            _ if err.is_timeout() => RepoError::Timeout {
                seconds: REQUEST_TIMEOUT_SECS,
            },
            Some(status) => RepoError::HttpError {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => RepoError::NetworkError {
                message: err.to_string(),
            },
        }
    }
}

impl From<url::ParseError> for RepoError {
    fn from(err: url::ParseError) -> Self {
        RepoError::InvalidRepositoryUrl {
            url: String::new(),
            reason: err.to_string(),
        }
    }
}
