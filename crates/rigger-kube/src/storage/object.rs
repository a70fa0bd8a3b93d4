//! Storage on namespaced Kubernetes objects, one object per revision

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::marker::PhantomData;

use super::{
    StorageConfig, StorageDriver, decode_from_storage, encode_for_storage, history_selector,
    newest_first, storage_labels,
};
use crate::error::{KubeError, Result};
use crate::release::{StoredRelease, storage_key};

/// A Kubernetes object kind able to carry an encoded revision
pub trait ReleaseObject:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Driver name used in logs
    const DRIVER: &'static str;

    fn build(metadata: ObjectMeta, payload: String) -> Self;

    /// The encoded revision, if the object carries one
    fn payload(&self) -> Option<String>;
}

/// Storage driver over any [`ReleaseObject`] kind
pub struct KubeDriver<K> {
    client: Client,
    config: StorageConfig,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ReleaseObject> KubeDriver<K> {
    pub fn new(client: Client, config: StorageConfig) -> Self {
        Self {
            client,
            config,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn to_object(&self, release: &StoredRelease) -> Result<K> {
        let payload = encode_for_storage(release, &self.config)?;
        let metadata = ObjectMeta {
            name: Some(release.storage_key()),
            namespace: Some(release.namespace.clone()),
            labels: Some(storage_labels(release)),
            ..Default::default()
        };
        Ok(K::build(metadata, payload))
    }

    fn from_object(object: &K) -> Result<StoredRelease> {
        let payload = object.payload().ok_or_else(|| {
            KubeError::Storage(format!(
                "{} {} has no '{}' data",
                K::DRIVER,
                object.meta().name.as_deref().unwrap_or("<unnamed>"),
                super::RELEASE_DATA_KEY
            ))
        })?;
        decode_from_storage(&payload)
    }

    fn not_found(namespace: &str, name: &str) -> KubeError {
        KubeError::ReleaseNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl<K: ReleaseObject> StorageDriver for KubeDriver<K> {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        match self.api(namespace).get_opt(&storage_key(name, version)).await? {
            Some(object) => Self::from_object(&object),
            None => Err(Self::not_found(namespace, name)),
        }
    }

    async fn history(
        &self,
        namespace: &str,
        name: &str,
        max: Option<usize>,
    ) -> Result<Vec<StoredRelease>> {
        let lp = ListParams::default().labels(&history_selector(name));
        let objects = self.api(namespace).list(&lp).await?;

        let mut releases = Vec::with_capacity(objects.items.len());
        for object in &objects.items {
            match Self::from_object(object) {
                Ok(release) => releases.push(release),
                Err(e) => tracing::warn!(
                    driver = K::DRIVER,
                    object = object.meta().name.as_deref().unwrap_or("<unnamed>"),
                    error = %e,
                    "skipping unreadable release revision"
                ),
            }
        }

        if releases.is_empty() {
            return Err(Self::not_found(namespace, name));
        }
        Ok(newest_first(releases, max))
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        let object = self.to_object(release)?;
        match self
            .api(&release.namespace)
            .create(&PostParams::default(), &object)
            .await
        {
            Ok(_) => {
                tracing::debug!(
                    driver = K::DRIVER,
                    key = %release.storage_key(),
                    "stored revision"
                );
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        let object = self.to_object(release)?;
        match self
            .api(&release.namespace)
            .replace(&release.storage_key(), &PostParams::default(), &object)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                Err(Self::not_found(&release.namespace, &release.name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<()> {
        match self
            .api(namespace)
            .delete(&storage_key(name, version), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(Self::not_found(namespace, name)),
            Err(e) => Err(e.into()),
        }
    }
}
