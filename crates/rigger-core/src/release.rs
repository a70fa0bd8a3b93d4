//! Release requests and results

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Longest release name accepted; object names derived from it must stay
/// within Kubernetes limits.
pub const MAX_RELEASE_NAME_LEN: usize = 53;

static RELEASE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .unwrap_or_else(|e| unreachable!("release name pattern is valid: {e}"))
});

/// What the caller asked for in one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    /// Chart to deploy: a name, a local path or `repo/chart`
    pub package_name: String,

    pub release_name: String,

    /// Repository the chart is fetched from on upgrade
    pub repository_url: Option<String>,

    /// Chart version; `None` means latest
    pub version: Option<String>,

    /// Raw `key=value` overrides, in order
    pub overrides: Vec<String>,
}

impl ReleaseRequest {
    pub fn new(package_name: impl Into<String>, release_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            release_name: release_name.into(),
            repository_url: None,
            version: None,
            overrides: Vec::new(),
        }
    }

    /// Set the repository URL. Blank strings clear it.
    pub fn with_repository(mut self, url: impl Into<String>) -> Self {
        self.repository_url = non_blank(url.into());
        self
    }

    /// Pin a chart version. Blank strings mean latest.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = non_blank(version.into());
        self
    }

    pub fn with_overrides(mut self, overrides: Vec<String>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Reject requests that cannot name a chart or a release
    pub fn validate(&self) -> Result<()> {
        if self.package_name.trim().is_empty() {
            return Err(CoreError::InvalidRequest {
                message: "chart name must not be empty".to_string(),
            });
        }

        if self.release_name.len() > MAX_RELEASE_NAME_LEN {
            return Err(CoreError::InvalidRequest {
                message: format!(
                    "release name '{}' is longer than {} characters",
                    self.release_name, MAX_RELEASE_NAME_LEN
                ),
            });
        }

        if !RELEASE_NAME.is_match(&self.release_name) {
            return Err(CoreError::InvalidRequest {
                message: format!(
                    "release name '{}' must consist of lowercase alphanumerics, '-' or '.', \
                     and start and end with an alphanumeric",
                    self.release_name
                ),
            });
        }

        Ok(())
    }
}

fn non_blank(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Outcome of an install or upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub name: String,
    pub revision: u32,
    pub status: ReleaseStatus,
}

/// Release status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Failed,
    Superseded,
    PendingInstall,
    PendingUpgrade,
}

impl ReleaseStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingInstall | Self::PendingUpgrade)
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
        };
        write!(f, "{}", s)
    }
}

/// Release information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub is_install: bool,
    pub is_upgrade: bool,
    /// Always "Rigger"
    pub service: String,
}

impl ReleaseInfo {
    pub fn for_install(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision: 1,
            is_install: true,
            is_upgrade: false,
            service: "Rigger".to_string(),
        }
    }

    pub fn for_upgrade(name: &str, namespace: &str, revision: u32) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision,
            is_install: false,
            is_upgrade: true,
            service: "Rigger".to_string(),
        }
    }
}
