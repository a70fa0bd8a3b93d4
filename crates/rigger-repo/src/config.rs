//! Repository aliases
//!
//! Read from `<config dir>/rigger/repositories.yaml`. The file uses the
//! same layout as Helm's, so unknown fields are ignored.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};

/// Repository configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    #[serde(default)]
    pub api_version: Option<String>,

    #[serde(default)]
    pub repositories: Vec<Repository>,
}

impl RepositoryConfig {
    /// Load configuration from the default location. A missing file is an
    /// empty configuration.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Ok(path) if path.exists() => Self::load_from(&path),
            Ok(_) => Ok(Self::default()),
            Err(e) => {
                tracing::debug!(error = %e, "no config directory, no repository aliases");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| RepoError::InvalidConfig {
            message: format!("{}: {}", path.display(), e),
        })
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepoError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("rigger").join("repositories.yaml"))
    }

    /// Get a repository by name
    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Look up an alias that must exist
    pub fn require(&self, name: &str) -> Result<&Repository> {
        self.get(name).ok_or_else(|| RepoError::RepositoryNotFound {
            name: name.to_string(),
        })
    }
}

/// Repository definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Alias used as `<name>/<chart>`
    pub name: String,

    pub url: String,
}
