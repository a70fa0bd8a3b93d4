//! Reconcile loop against in-memory release storage

use async_trait::async_trait;
use rigger_core::{
    BoxError, ChartPackage, ChartResolver, OperationContext, ReconcileError, ReconcilerConfig,
    Reconciler, ReleaseRequest, ReleaseStatus, SetValuesMerger,
};
use rigger_kube::{DryRunApplier, KubeReleaseRunner, MemoryDriver, StorageDriver, StorageHistory};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Resolves every chart name to one directory on disk
struct LocalCharts {
    dir: PathBuf,
}

#[async_trait]
impl ChartResolver for LocalCharts {
    async fn locate(
        &self,
        _name: &str,
        _repository_url: Option<&str>,
        _version: Option<&str>,
    ) -> Result<PathBuf, BoxError> {
        Ok(self.dir.clone())
    }

    async fn load(&self, path: &Path) -> Result<Option<ChartPackage>, BoxError> {
        Ok(Some(ChartPackage::load(path)?))
    }
}

fn write_chart(root: &Path) -> PathBuf {
    let dir = root.join("web");
    fs::create_dir_all(dir.join("templates")).unwrap();
    fs::write(
        dir.join("Chart.yaml"),
        "apiVersion: v2\nname: web\nversion: 0.3.0\nappVersion: \"1.25\"\n",
    )
    .unwrap();
    fs::write(dir.join("values.yaml"), "color: blue\nreplicas: 1\n").unwrap();
    fs::write(
        dir.join("templates/configmap.yaml"),
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ release.name }}-settings
data:
  color: {{ values.color | quote }}
  revision: {{ release.revision | quote }}
"#,
    )
    .unwrap();
    dir
}

type TestReconciler =
    Reconciler<StorageHistory, LocalCharts, SetValuesMerger, KubeReleaseRunner>;

fn reconciler(storage: &MemoryDriver, chart_dir: PathBuf) -> TestReconciler {
    let storage: Arc<dyn StorageDriver> = Arc::new(storage.clone());
    Reconciler::new(
        ReconcilerConfig {
            namespace: "apps".to_string(),
            storage_driver: "memory".to_string(),
        },
        StorageHistory::new(storage.clone()),
        LocalCharts { dir: chart_dir },
        SetValuesMerger,
        KubeReleaseRunner::new(storage, Arc::new(DryRunApplier)),
    )
}

#[tokio::test]
async fn test_install_then_upgrade() {
    let temp = TempDir::new().unwrap();
    let storage = MemoryDriver::new();
    let reconciler = reconciler(&storage, write_chart(temp.path()));
    let ctx = OperationContext::new();

    let first = reconciler
        .reconcile(&ReleaseRequest::new("web", "shop"), &ctx)
        .await
        .unwrap();
    assert_eq!(first.revision, 1);
    assert_eq!(first.status, ReleaseStatus::Deployed);

    let request = ReleaseRequest::new("web", "shop")
        .with_repository("https://charts.example.com")
        .with_version("0.3.0")
        .with_overrides(vec!["color=green".to_string()]);
    let second = reconciler.reconcile(&request, &ctx).await.unwrap();
    assert_eq!(second.revision, 2);

    let latest = storage.get_latest("apps", "shop").await.unwrap();
    insta::assert_snapshot!(latest.manifest, @r#"
    ---
    # Source: web/templates/configmap.yaml
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: shop-settings
    data:
      color: "green"
      revision: "2"
    "#);

    let previous = storage.get("apps", "shop", 1).await.unwrap();
    assert_eq!(previous.state.status(), ReleaseStatus::Superseded);
}

#[tokio::test]
async fn test_invalid_override_records_nothing() {
    let temp = TempDir::new().unwrap();
    let storage = MemoryDriver::new();
    let reconciler = reconciler(&storage, write_chart(temp.path()));

    let request = ReleaseRequest::new("web", "shop").with_overrides(vec!["color".to_string()]);
    let err = reconciler
        .reconcile(&request, &OperationContext::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::ValueMerge { .. }));
    assert_eq!(storage.release_count().await, 0);
}

#[tokio::test]
async fn test_cancelled_reconcile_records_nothing() {
    let temp = TempDir::new().unwrap();
    let storage = MemoryDriver::new();
    let reconciler = reconciler(&storage, write_chart(temp.path()));
    let ctx = OperationContext::new();
    ctx.cancel();

    let err = reconciler
        .reconcile(&ReleaseRequest::new("web", "shop"), &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Cancelled { .. }));
    assert_eq!(storage.release_count().await, 0);
}
