//! In-memory storage driver
//!
//! Revisions live for the lifetime of the process. Used for dry runs and
//! tests that must not touch a cluster.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{StorageDriver, newest_first};
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

type Revisions = BTreeMap<u32, StoredRelease>;

/// In-memory storage driver; clones share the same store
#[derive(Clone, Default)]
pub struct MemoryDriver {
    /// (namespace, name) -> version -> revision
    store: Arc<RwLock<HashMap<(String, String), Revisions>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated revisions
    pub async fn with_releases(releases: impl IntoIterator<Item = StoredRelease>) -> Self {
        let driver = Self::new();
        {
            let mut store = driver.store.write().await;
            for release in releases {
                store
                    .entry((release.namespace.clone(), release.name.clone()))
                    .or_default()
                    .insert(release.version, release);
            }
        }
        driver
    }

    /// Count of stored revisions across all releases
    pub async fn release_count(&self) -> usize {
        self.store.read().await.values().map(BTreeMap::len).sum()
    }

    fn key(namespace: &str, name: &str) -> (String, String) {
        (namespace.to_string(), name.to_string())
    }

    fn not_found(namespace: &str, name: &str) -> KubeError {
        KubeError::ReleaseNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        self.store
            .read()
            .await
            .get(&Self::key(namespace, name))
            .and_then(|revisions| revisions.get(&version))
            .cloned()
            .ok_or_else(|| Self::not_found(namespace, name))
    }

    async fn history(
        &self,
        namespace: &str,
        name: &str,
        max: Option<usize>,
    ) -> Result<Vec<StoredRelease>> {
        let store = self.store.read().await;
        let revisions = store
            .get(&Self::key(namespace, name))
            .filter(|revisions| !revisions.is_empty())
            .ok_or_else(|| Self::not_found(namespace, name))?;

        Ok(newest_first(revisions.values().cloned().collect(), max))
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        let mut store = self.store.write().await;
        let revisions = store
            .entry(Self::key(&release.namespace, &release.name))
            .or_default();

        if revisions.contains_key(&release.version) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            });
        }
        revisions.insert(release.version, release.clone());
        Ok(())
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        let mut store = self.store.write().await;
        let slot = store
            .get_mut(&Self::key(&release.namespace, &release.name))
            .and_then(|revisions| revisions.get_mut(&release.version))
            .ok_or_else(|| Self::not_found(&release.namespace, &release.name))?;

        *slot = release.clone();
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<()> {
        let mut store = self.store.write().await;
        let key = Self::key(namespace, name);
        let revisions = store
            .get_mut(&key)
            .ok_or_else(|| Self::not_found(namespace, name))?;

        revisions
            .remove(&version)
            .ok_or_else(|| Self::not_found(namespace, name))?;
        if revisions.is_empty() {
            store.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::tests::release;

    #[tokio::test]
    async fn test_history_newest_first() {
        let driver =
            MemoryDriver::with_releases([release("web", 1), release("web", 3), release("web", 2)])
                .await;

        let history = driver.history("default", "web", None).await.unwrap();
        let versions: Vec<u32> = history.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);

        assert_eq!(driver.get_latest("default", "web").await.unwrap().version, 3);
    }

    #[tokio::test]
    async fn test_missing_release() {
        let driver = MemoryDriver::new();

        assert!(matches!(
            driver.get_latest("default", "web").await,
            Err(KubeError::ReleaseNotFound { .. })
        ));
        assert!(!driver.exists("default", "web").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let driver = MemoryDriver::new();
        driver.create(&release("web", 1)).await.unwrap();

        assert!(matches!(
            driver.create(&release("web", 1)).await,
            Err(KubeError::ReleaseAlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let driver = MemoryDriver::with_releases([release("web", 1)]).await;

        let mut r = driver.get("default", "web", 1).await.unwrap();
        r.mark_superseded();
        driver.update(&r).await.unwrap();
        assert_eq!(
            driver.get("default", "web", 1).await.unwrap().state.to_string(),
            "superseded"
        );

        driver.delete("default", "web", 1).await.unwrap();
        assert_eq!(driver.release_count().await, 0);
        assert!(driver.update(&r).await.is_err());
    }

    #[tokio::test]
    async fn test_namespaces_are_separate() {
        let driver = MemoryDriver::with_releases([release("web", 1)]).await;
        assert!(!driver.exists("other", "web").await.unwrap());
    }
}
