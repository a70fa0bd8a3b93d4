//! CLI error type with exit code mapping

use miette::Diagnostic;
use rigger_core::{ErrorKind, Interruption, ReconcileError};
use rigger_kube::KubeError;
use rigger_repo::RepoError;
use thiserror::Error;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    #[diagnostic(code(rigger::reconcile))]
    Reconcile(#[from] ReconcileError),

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(rigger::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Cluster error: {0}")]
    #[diagnostic(
        code(rigger::cli::cluster),
        help("check --kubeconfig, or run with --dry-run --storage-driver memory")
    )]
    Cluster(#[from] KubeError),

    #[error("Repository error: {0}")]
    #[diagnostic(code(rigger::cli::repository))]
    Repository(#[from] RepoError),

    #[error("Interrupted before reconciling: {0}")]
    #[diagnostic(code(rigger::cli::interrupted))]
    Interrupted(#[from] Interruption),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Reconcile(err) => match err.kind() {
                ErrorKind::InvalidRequest => exit_codes::USAGE_ERROR,
                ErrorKind::Lookup => exit_codes::ERROR,
                ErrorKind::Resolution => exit_codes::RESOLUTION_ERROR,
                ErrorKind::ValueMerge => exit_codes::VALUE_ERROR,
                ErrorKind::Execution => exit_codes::EXECUTION_ERROR,
                ErrorKind::Cancellation => exit_codes::INTERRUPTED,
            },
            CliError::Config { .. } => exit_codes::USAGE_ERROR,
            CliError::Cluster(KubeError::Interrupted(_)) => exit_codes::INTERRUPTED,
            CliError::Cluster(_) | CliError::Repository(_) => exit_codes::ERROR,
            CliError::Interrupted(_) => exit_codes::INTERRUPTED,
        }
    }

    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
