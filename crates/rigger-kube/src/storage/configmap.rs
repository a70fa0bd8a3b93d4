//! ConfigMap storage driver
//!
//! Same layout as the Secrets driver, readable by anyone who can read
//! ConfigMaps in the namespace.

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use super::{KubeDriver, RELEASE_DATA_KEY, ReleaseObject};

pub type ConfigMapDriver = KubeDriver<ConfigMap>;

impl ReleaseObject for ConfigMap {
    const DRIVER: &'static str = "configmap";

    fn build(metadata: ObjectMeta, payload: String) -> Self {
        ConfigMap {
            metadata,
            data: Some(BTreeMap::from([(RELEASE_DATA_KEY.to_string(), payload)])),
            ..Default::default()
        }
    }

    fn payload(&self) -> Option<String> {
        self.data.as_ref()?.get(RELEASE_DATA_KEY).cloned()
    }
}
