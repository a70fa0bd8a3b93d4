//! HTTP repository client
//!
//! Traditional Helm-style repositories: an `index.yaml` at the repository
//! root and chart archives referenced from it.

use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

use crate::error::{REQUEST_TIMEOUT_SECS, RepoError, Result};
use crate::index::{ChartEntry, RepositoryIndex};

const INDEX_FILE: &str = "index.yaml";

/// HTTP repository client
#[derive(Debug, Clone)]
pub struct HttpRepository {
    name: String,
    /// Base URL, always ending in `/` so relative joins stay inside it
    url: Url,
    client: reqwest::Client,
}

impl HttpRepository {
    pub fn new(name: impl Into<String>, url: &str) -> Result<Self> {
        let url = parse_base_url(url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("rigger/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;

        Ok(Self {
            name: name.into(),
            url,
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn index_url(&self) -> Result<Url> {
        Ok(self.url.join(INDEX_FILE)?)
    }

    /// Fetch and parse the repository index
    pub async fn fetch_index(&self) -> Result<RepositoryIndex> {
        let index_url = self.index_url()?;
        tracing::debug!(url = %index_url, "fetching repository index");

        let data = match self.get_bytes(&index_url).await {
            Err(RepoError::HttpError { status: 404, .. }) => {
                return Err(RepoError::IndexNotFound {
                    url: index_url.to_string(),
                });
            }
            other => other?,
        };

        RepositoryIndex::from_bytes(&data)
    }

    /// Absolute download URL of an entry
    pub fn archive_url(&self, entry: &ChartEntry) -> Result<Url> {
        let url = entry.download_url().ok_or_else(|| RepoError::ChartNotFound {
            name: entry.name.clone(),
            hint: format!("index entry {} lists no download URL", entry.version),
        })?;

        // `join` keeps absolute URLs as they are.
        Ok(self.url.join(url)?)
    }

    /// Download a chart archive, verifying its digest when the index has one
    pub async fn download(&self, entry: &ChartEntry) -> Result<Vec<u8>> {
        let url = self.archive_url(entry)?;
        tracing::info!(
            chart = %entry.name,
            version = %entry.version,
            url = %url,
            "downloading chart"
        );

        let data = self.get_bytes(&url).await?;
        verify_digest(entry, &data)?;

        Ok(data)
    }

    async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(RepoError::HttpError {
                status: status.as_u16(),
                message: format!("Request to {} failed", url),
            });
        }

        let bytes = response.bytes().await.map_err(|e| RepoError::NetworkError {
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed).map_err(|e| RepoError::InvalidRepositoryUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(RepoError::InvalidRepositoryUrl {
            url: trimmed.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Check `data` against the digest recorded for `entry`, if any
pub fn verify_digest(entry: &ChartEntry, data: &[u8]) -> Result<()> {
    if let Some(expected) = &entry.digest {
        let actual = compute_digest(data);
        if !digest_matches(expected, &actual) {
            return Err(RepoError::IntegrityCheckFailed {
                name: format!("{}-{}", entry.name, entry.version),
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(())
}

/// Compute SHA256 digest of data
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Compare digests, tolerating case and `sha256:`/`sha256-` prefixes
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    normalize_digest(expected) == normalize_digest(actual)
}

fn normalize_digest(digest: &str) -> String {
    let lower = digest.trim().to_lowercase();
    lower
        .strip_prefix("sha256:")
        .or_else(|| lower.strip_prefix("sha256-"))
        .unwrap_or(&lower)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_digest() {
        let digest = compute_digest(b"hello world");
        assert_eq!(
            digest,
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_digest_matches() {
        assert!(digest_matches("sha256:abc123", "sha256:ABC123"));
        assert!(digest_matches("sha256:abc123", "abc123"));
        assert!(digest_matches("sha256-abc123", "abc123"));
        assert!(!digest_matches("sha256:abc123", "sha256:xyz789"));
    }

    #[test]
    fn test_base_url_keeps_path() {
        let repo = HttpRepository::new("nginx", "https://helm.nginx.com/stable").unwrap();
        assert_eq!(
            repo.index_url().unwrap().as_str(),
            "https://helm.nginx.com/stable/index.yaml"
        );
    }

    #[test]
    fn test_archive_url_resolution() {
        let repo = HttpRepository::new("r", "https://charts.example.com/stable/").unwrap();

        let relative = ChartEntry {
            name: "web".into(),
            version: "1.0.0".into(),
            urls: vec!["web-1.0.0.tgz".into()],
            ..Default::default()
        };
        assert_eq!(
            repo.archive_url(&relative).unwrap().as_str(),
            "https://charts.example.com/stable/web-1.0.0.tgz"
        );

        let absolute = ChartEntry {
            urls: vec!["https://cdn.example.com/web-1.0.0.tgz".into()],
            ..relative
        };
        assert_eq!(
            repo.archive_url(&absolute).unwrap().as_str(),
            "https://cdn.example.com/web-1.0.0.tgz"
        );
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(matches!(
            HttpRepository::new("r", "oci://registry/charts"),
            Err(RepoError::InvalidRepositoryUrl { .. })
        ));
    }
}
