//! [`HistoryLookup`] over a storage driver

use async_trait::async_trait;
use rigger_core::{BoxError, HistoryLookup, OperationContext, ReleaseScope};
use std::sync::Arc;

use crate::error::KubeError;
use crate::storage::StorageDriver;

/// Reads the latest revision number from release storage
#[derive(Clone)]
pub struct StorageHistory {
    storage: Arc<dyn StorageDriver>,
}

impl StorageHistory {
    pub fn new(storage: Arc<dyn StorageDriver>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl HistoryLookup for StorageHistory {
    async fn latest_revision(
        &self,
        scope: &ReleaseScope,
        ctx: &OperationContext,
    ) -> Result<Option<u32>, BoxError> {
        let lookup = self
            .storage
            .history(&scope.namespace, &scope.release_name, Some(1));

        match ctx.run(lookup).await.map_err(KubeError::from)? {
            Ok(history) => Ok(history.first().map(|r| r.version)),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
