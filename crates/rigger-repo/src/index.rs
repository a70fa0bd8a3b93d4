//! `index.yaml` of a chart repository
//!
//! Helm-compatible `index.yaml`: chart versions grouped by chart name.

use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{RepoError, Result};

/// Repository index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub generated: Option<DateTime<Utc>>,

    /// Chart versions indexed by chart name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartEntry>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl RepositoryIndex {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })
    }

    /// Parse a downloaded index
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParseError {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// Highest stable version of a chart. Pre-releases are only picked
    /// when nothing else is published.
    pub fn get_latest(&self, name: &str) -> Option<&ChartEntry> {
        let versions = self.entries.get(name)?;
        let stable = versions
            .iter()
            .filter(|e| e.parsed_version().is_some_and(|v| v.pre.is_empty()))
            .max_by(|a, b| compare_versions(a, b));

        stable.or_else(|| versions.iter().max_by(|a, b| compare_versions(a, b)))
    }

    /// Exact version lookup; a leading `v` on either side is ignored
    pub fn get_version(&self, name: &str, version: &str) -> Option<&ChartEntry> {
        let wanted = version.trim_start_matches('v');
        self.entries
            .get(name)?
            .iter()
            .find(|e| e.version.trim_start_matches('v') == wanted)
    }

    /// Highest version satisfying a SemVer requirement
    pub fn find_best_match(&self, name: &str, constraint: &str) -> Result<&ChartEntry> {
        let entries = self
            .entries
            .get(name)
            .ok_or_else(|| RepoError::NoVersionsAvailable {
                name: name.to_string(),
            })?;

        let req = VersionReq::parse(constraint).map_err(|_| RepoError::UnsatisfiableConstraint {
            name: name.to_string(),
            constraint: constraint.to_string(),
            available: available_versions(entries),
        })?;

        entries
            .iter()
            .filter(|e| e.parsed_version().is_some_and(|v| req.matches(&v)))
            .max_by(|a, b| compare_versions(a, b))
            .ok_or_else(|| RepoError::UnsatisfiableConstraint {
                name: name.to_string(),
                constraint: constraint.to_string(),
                available: available_versions(entries),
            })
    }

    /// Pick the entry to install: latest when no version is given, an
    /// exact match when one exists, otherwise the best constraint match.
    pub fn select(&self, name: &str, version: Option<&str>, repo: &str) -> Result<&ChartEntry> {
        if self.entries.get(name).is_none_or(|v| v.is_empty()) {
            return Err(RepoError::ChartNotFound {
                name: name.to_string(),
                hint: format!("repository {} does not publish it", repo),
            });
        }

        match version {
            None => self
                .get_latest(name)
                .ok_or_else(|| RepoError::NoVersionsAvailable {
                    name: name.to_string(),
                }),
            Some(version) => match self.get_version(name, version) {
                Some(entry) => Ok(entry),
                None => {
                    let is_exact = Version::parse(version.trim_start_matches('v')).is_ok();
                    self.find_best_match(name, version).map_err(|e| match e {
                        RepoError::UnsatisfiableConstraint { .. } if is_exact => {
                            RepoError::VersionNotFound {
                                name: name.to_string(),
                                version: version.to_string(),
                                repo: repo.to_string(),
                            }
                        }
                        other => other,
                    })
                }
            },
        }
    }
}

fn compare_versions(a: &ChartEntry, b: &ChartEntry) -> Ordering {
    match (a.parsed_version(), b.parsed_version()) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.version.cmp(&b.version),
    }
}

fn available_versions(entries: &[ChartEntry]) -> String {
    if entries.is_empty() {
        return "none".to_string();
    }
    entries
        .iter()
        .map(|e| e.version.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One chart version in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Archive locations, absolute or relative to the repository URL
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deprecated: bool,

    #[serde(default)]
    pub api_version: Option<String>,
}

impl ChartEntry {
    /// First listed archive URL
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }

    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(self.version.trim_start_matches('v')).ok()
    }
}
