//! [`ReleaseRunner`] that renders charts, records revisions and applies
//! manifests

use async_trait::async_trait;
use rigger_core::{
    BoxError, Capabilities, ChartPackage, OperationContext, ReleaseInfo, ReleaseRecord,
    ReleaseRunner, ReleaseScope, TemplateContext, Values,
};
use rigger_engine::Engine;
use std::future::Future;
use std::sync::Arc;

use crate::error::{KubeError, Result};
use crate::release::{ReleaseState, StoredRelease};
use crate::resources::ManifestApplier;
use crate::storage::{StorageConfig, StorageDriver};

/// Install and upgrade through a storage driver and a manifest applier.
///
/// Steps before the pending revision is recorded stop as soon as the
/// context is interrupted. Once it is recorded, status writes always run
/// so no revision is left pending. On upgrade the previous revision is
/// marked superseded only after the new one is deployed.
pub struct KubeReleaseRunner {
    storage: Arc<dyn StorageDriver>,
    applier: Arc<dyn ManifestApplier>,
    engine: Engine,
    capabilities: Capabilities,
    max_history: usize,
}

impl KubeReleaseRunner {
    pub fn new(storage: Arc<dyn StorageDriver>, applier: Arc<dyn ManifestApplier>) -> Self {
        Self {
            storage,
            applier,
            engine: Engine::default(),
            capabilities: Capabilities::default(),
            max_history: StorageConfig::default().max_history,
        }
    }

    /// Cluster capabilities exposed to templates
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Revisions kept per release; 0 keeps all
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Install revision 1 of a new release
    pub async fn install_release(
        &self,
        scope: &ReleaseScope,
        chart: &ChartPackage,
        overrides: &Values,
        ctx: &OperationContext,
    ) -> Result<StoredRelease> {
        chart.ensure_installable()?;
        let (namespace, name) = (&scope.namespace, &scope.release_name);

        if guarded(ctx, self.storage.exists(namespace, name)).await? {
            return Err(KubeError::ReleaseAlreadyExists {
                name: name.clone(),
                namespace: namespace.clone(),
            });
        }

        let values = chart.coalesce_values(overrides);
        let (manifest, notes) =
            self.render(chart, &values, ReleaseInfo::for_install(name, namespace))?;

        let mut release = StoredRelease::for_install(
            name.clone(),
            namespace.clone(),
            chart.metadata.clone(),
            values,
            manifest,
        );
        release.notes = notes;

        guarded(ctx, self.storage.create(&release)).await?;
        tracing::info!(release = %scope, revision = release.version, "recorded pending install");

        self.deploy(&mut release, ctx).await?;
        Ok(release)
    }

    /// Upgrade to the next revision, or install when nothing is recorded
    /// and `install_if_absent` is set
    pub async fn upgrade_release(
        &self,
        scope: &ReleaseScope,
        chart: &ChartPackage,
        overrides: &Values,
        ctx: &OperationContext,
        install_if_absent: bool,
    ) -> Result<StoredRelease> {
        chart.ensure_installable()?;
        let (namespace, name) = (&scope.namespace, &scope.release_name);

        let mut previous = match guarded(ctx, self.storage.get_latest(namespace, name)).await {
            Ok(previous) => previous,
            Err(KubeError::ReleaseNotFound { .. }) if install_if_absent => {
                tracing::info!(release = %scope, "no recorded revision, installing instead");
                return self.install_release(scope, chart, overrides, ctx).await;
            }
            Err(e) => return Err(e),
        };

        if previous.state.is_pending() {
            return Err(KubeError::OperationInProgress {
                name: name.clone(),
                status: previous.state.to_string(),
            });
        }

        let values = chart.coalesce_values(overrides);
        let revision = previous.version + 1;
        let (manifest, notes) = self.render(
            chart,
            &values,
            ReleaseInfo::for_upgrade(name, namespace, revision),
        )?;

        let mut release =
            StoredRelease::for_upgrade(&previous, chart.metadata.clone(), values, manifest);
        release.notes = notes;

        guarded(ctx, self.storage.create(&release)).await?;
        tracing::info!(release = %scope, revision, "recorded pending upgrade");

        self.deploy(&mut release, ctx).await?;

        // The new revision is already deployed; a stale previous status is
        // only logged.
        if previous.state == ReleaseState::Deployed {
            previous.mark_superseded();
            if let Err(e) = self.storage.update(&previous).await {
                tracing::warn!(
                    release = %scope,
                    revision = previous.version,
                    error = %e,
                    "could not mark previous revision superseded"
                );
            }
        }

        self.prune_history(scope).await;
        Ok(release)
    }

    fn render(
        &self,
        chart: &ChartPackage,
        values: &Values,
        info: ReleaseInfo,
    ) -> Result<(String, Option<String>)> {
        let context = TemplateContext::new(values.clone(), info, &chart.metadata)
            .with_capabilities(self.capabilities.clone());
        let rendered = self.engine.render_chart(chart, &context)?;
        tracing::debug!(documents = rendered.manifests.len(), "rendered chart");
        Ok((rendered.manifest(), rendered.notes))
    }

    /// Apply the manifest and record the outcome on `release`.
    ///
    /// Any error after the pending revision exists, including a failed
    /// write of the deployed status, leaves the revision marked failed.
    async fn deploy(&self, release: &mut StoredRelease, ctx: &OperationContext) -> Result<()> {
        let applied = guarded(
            ctx,
            self.applier
                .apply(&release.namespace, &release.manifest, ctx),
        )
        .await;

        let outcome = match applied {
            Ok(summary) => {
                release.mark_deployed();
                self.storage.update(release).await.map(|()| summary)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(summary) => {
                tracing::info!(
                    release = %release.name,
                    revision = release.version,
                    resources = summary.applied.len(),
                    "deployed"
                );
                Ok(())
            }
            Err(e) => {
                let reason = match &e {
                    KubeError::Interrupted(_) => "interrupted".to_string(),
                    other => other.to_string(),
                };
                release.mark_failed(reason);
                if let Err(store_err) = self.storage.update(release).await {
                    tracing::warn!(
                        release = %release.name,
                        revision = release.version,
                        error = %store_err,
                        "could not record failed revision"
                    );
                }
                Err(e)
            }
        }
    }

    async fn prune_history(&self, scope: &ReleaseScope) {
        if self.max_history == 0 {
            return;
        }

        let history = match self
            .storage
            .history(&scope.namespace, &scope.release_name, None)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(release = %scope, error = %e, "could not read history for pruning");
                return;
            }
        };

        for old in history.iter().skip(self.max_history) {
            match self
                .storage
                .delete(&scope.namespace, &scope.release_name, old.version)
                .await
            {
                Ok(()) => tracing::debug!(release = %scope, revision = old.version, "pruned"),
                Err(e) => tracing::warn!(
                    release = %scope,
                    revision = old.version,
                    error = %e,
                    "prune failed"
                ),
            }
        }
    }
}

/// Await `fut` unless the context is interrupted first
async fn guarded<T, F>(ctx: &OperationContext, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    ctx.run(fut).await?
}

#[async_trait]
impl ReleaseRunner for KubeReleaseRunner {
    async fn install(
        &self,
        scope: &ReleaseScope,
        chart: ChartPackage,
        values: Values,
        ctx: &OperationContext,
    ) -> std::result::Result<ReleaseRecord, BoxError> {
        let release = self.install_release(scope, &chart, &values, ctx).await?;
        Ok(release.to_record())
    }

    async fn upgrade(
        &self,
        scope: &ReleaseScope,
        chart: ChartPackage,
        values: Values,
        ctx: &OperationContext,
        install_if_absent: bool,
    ) -> std::result::Result<ReleaseRecord, BoxError> {
        let release = self
            .upgrade_release(scope, &chart, &values, ctx, install_if_absent)
            .await?;
        Ok(release.to_record())
    }
}
