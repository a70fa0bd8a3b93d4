//! [`ChartResolver`] backed by local paths and HTTP repositories

use async_trait::async_trait;
use rigger_core::archive::is_chart_archive;
use rigger_core::{BoxError, ChartPackage, ChartResolver};
use std::path::{Path, PathBuf};

use crate::config::RepositoryConfig;
use crate::error::{RepoError, Result};
use crate::http::{HttpRepository, compute_digest, digest_matches};
use crate::index::ChartEntry;

/// Locates charts on disk, in a repository given by URL, or through a
/// configured `alias/chart` name. Downloads land in a cache directory.
#[derive(Debug, Clone)]
pub struct RepoChartResolver {
    config: RepositoryConfig,
    cache_dir: PathBuf,
}

impl RepoChartResolver {
    pub fn new(config: RepositoryConfig, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            cache_dir: cache_dir.into(),
        }
    }

    /// Aliases from the user's repositories file, cache under the user's
    /// cache directory
    pub fn from_environment() -> Result<Self> {
        let config = RepositoryConfig::load()?;
        Ok(Self::new(config, Self::default_cache_dir()?))
    }

    pub fn default_cache_dir() -> Result<PathBuf> {
        let cache = dirs::cache_dir().ok_or_else(|| RepoError::InvalidConfig {
            message: "Could not determine cache directory".to_string(),
        })?;
        Ok(cache.join("rigger").join("charts"))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolve a chart reference to a local directory or archive
    pub async fn resolve(
        &self,
        name: &str,
        repository_url: Option<&str>,
        version: Option<&str>,
    ) -> Result<PathBuf> {
        let local = Path::new(name);
        if local.is_dir() || (local.is_file() && is_chart_archive(local)) {
            tracing::debug!(path = %local.display(), "using local chart");
            return Ok(local.to_path_buf());
        }

        if let Some(url) = repository_url {
            let repo = HttpRepository::new(url, url)?;
            return self.fetch(&repo, name, version).await;
        }

        if let Some((alias, chart)) = name.split_once('/') {
            if let Some(configured) = self.config.get(alias) {
                let repo = HttpRepository::new(&configured.name, &configured.url)?;
                return self.fetch(&repo, chart, version).await;
            }
        }

        Err(RepoError::ChartNotFound {
            name: name.to_string(),
            hint: "not a local chart; pass a repository URL or configure a repository alias"
                .to_string(),
        })
    }

    async fn fetch(
        &self,
        repo: &HttpRepository,
        chart: &str,
        version: Option<&str>,
    ) -> Result<PathBuf> {
        let index = repo.fetch_index().await?;
        let entry = index.select(chart, version, repo.name())?;
        if entry.deprecated {
            tracing::warn!(chart = %entry.name, version = %entry.version, "chart is deprecated");
        }

        let target = self.cache_path(entry);
        if self.is_cached(entry, &target).await {
            tracing::debug!(path = %target.display(), "reusing cached chart archive");
            return Ok(target);
        }

        let data = repo.download(entry).await?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        // Written aside then renamed, so a partial download is never reused.
        let partial = target.with_extension("tgz.part");
        tokio::fs::write(&partial, &data).await?;
        tokio::fs::rename(&partial, &target).await?;

        tracing::debug!(path = %target.display(), bytes = data.len(), "cached chart archive");
        Ok(target)
    }

    fn cache_path(&self, entry: &ChartEntry) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}.tgz", entry.name, entry.version))
    }

    /// Only archives whose digest the index vouches for are reused
    async fn is_cached(&self, entry: &ChartEntry, path: &Path) -> bool {
        let Some(expected) = &entry.digest else {
            return false;
        };
        match tokio::fs::read(path).await {
            Ok(data) => digest_matches(expected, &compute_digest(&data)),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ChartResolver for RepoChartResolver {
    async fn locate(
        &self,
        name: &str,
        repository_url: Option<&str>,
        version: Option<&str>,
    ) -> std::result::Result<PathBuf, BoxError> {
        Ok(self.resolve(name, repository_url, version).await?)
    }

    async fn load(&self, path: &Path) -> std::result::Result<Option<ChartPackage>, BoxError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "located chart is gone");
            return Ok(None);
        }
        Ok(Some(ChartPackage::load(path)?))
    }
}

