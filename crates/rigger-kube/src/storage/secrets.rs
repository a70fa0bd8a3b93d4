//! Kubernetes Secrets storage driver
//!
//! The default driver. Each revision is an opaque Secret of type
//! `rigger.sh/release.v1`.

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use super::{KubeDriver, RELEASE_DATA_KEY, ReleaseObject};

/// Secret type marking release storage
pub const SECRET_TYPE: &str = "rigger.sh/release.v1";

pub type SecretsDriver = KubeDriver<Secret>;

impl ReleaseObject for Secret {
    const DRIVER: &'static str = "secret";

    fn build(metadata: ObjectMeta, payload: String) -> Self {
        Secret {
            metadata,
            type_: Some(SECRET_TYPE.to_string()),
            data: Some(BTreeMap::from([(
                RELEASE_DATA_KEY.to_string(),
                ByteString(payload.into_bytes()),
            )])),
            ..Default::default()
        }
    }

    fn payload(&self) -> Option<String> {
        let bytes = self.data.as_ref()?.get(RELEASE_DATA_KEY)?;
        String::from_utf8(bytes.0.clone()).ok()
    }
}
